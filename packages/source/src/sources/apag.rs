//! Aachener Parkhaus GmbH (APAG).
//!
//! Lists its car parks in Aachen and Datteln on two HTML pages; every list
//! entry links to a detail page with capacity, address and coordinates.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use park_api_parking_models::{LotData, LotInfo, LotStatus, PoolInfo, guess_lot_type};
use park_api_scraper::Fetcher;
use scraper::{Html, Selector};

use crate::html::{selector, text, text_lines};
use crate::parsing::{float_or_none, int_or_none, leading_int, now};
use crate::{ParkingSource, SourceError};

const PUBLIC_URL: &str = "https://www.apag.de";

/// City pages as `(lot id prefix, path)`.
const CITY_PAGES: &[(&str, &str)] = &[
    ("aachen", "/parken-in-aachen"),
    ("datteln", "/parken-in-datteln"),
];

static LOT_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("div.houses li"));
static LOT_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static FREE_TEXT: LazyLock<Selector> = LazyLock::new(|| selector("span.free-text"));
static TOTAL: LazyLock<Selector> = LazyLock::new(|| selector("span.total"));
static ADDRESS: LazyLock<Selector> = LazyLock::new(|| selector("div.address"));
static LATITUDE: LazyLock<Selector> = LazyLock::new(|| selector("meta[itemprop=latitude]"));
static LONGITUDE: LazyLock<Selector> = LazyLock::new(|| selector("meta[itemprop=longitude]"));

/// One entry of a city list page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListEntry {
    name: String,
    href: Option<String>,
    free_text: Option<String>,
}

/// Values of a lot detail page.
#[derive(Debug, Clone, Default, PartialEq)]
struct LotPage {
    capacity: Option<i64>,
    address: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// APAG source.
pub struct ApagSource {
    pool: PoolInfo,
}

impl ApagSource {
    /// Creates the APAG source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: PoolInfo::new("apag", "Aachener Parkhaus GmbH").with_public_url(PUBLIC_URL),
        }
    }
}

impl Default for ApagSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a city list page, dropping repeated lot names.
fn parse_list(html: &str) -> Result<Vec<ListEntry>, SourceError> {
    let doc = Html::parse_document(html);
    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();

    for item in doc.select(&LOT_ITEM) {
        let link = item
            .select(&LOT_LINK)
            .next()
            .ok_or_else(|| SourceError::extraction("APAG lot entry without link"))?;
        let name = text(link);
        if !seen.insert(name.clone()) {
            continue;
        }

        entries.push(ListEntry {
            name,
            href: link.value().attr("href").map(str::to_string),
            free_text: item.select(&FREE_TEXT).next().map(text),
        });
    }

    Ok(entries)
}

/// Converts list entries into observations. Entries without a readable
/// free count are reported as `nodata`.
fn lot_data_from_entries(
    prefix: &str,
    entries: &[ListEntry],
    timestamp: DateTime<Utc>,
) -> Result<Vec<LotData>, SourceError> {
    entries
        .iter()
        .map(|entry| {
            let num_free = entry.free_text.as_deref().and_then(leading_int);
            let status = if num_free.is_some() {
                LotStatus::Open
            } else {
                LotStatus::NoData
            };
            LotData::builder(timestamp, &format!("{prefix}-{}", entry.name), status)
                .num_free(num_free)
                .build()
                .map_err(SourceError::from)
        })
        .collect()
}

fn parse_lot_page(html: &str) -> LotPage {
    let doc = Html::parse_document(html);
    let meta_float = |sel: &Selector| {
        doc.select(sel)
            .next()
            .and_then(|e| e.value().attr("content"))
            .and_then(float_or_none)
    };

    LotPage {
        capacity: doc
            .select(&TOTAL)
            .next()
            .and_then(|e| text(e).split_whitespace().last().and_then(int_or_none)),
        address: doc
            .select(&ADDRESS)
            .next()
            .map(text_lines)
            .filter(|a| !a.is_empty()),
        latitude: meta_float(&LATITUDE),
        longitude: meta_float(&LONGITUDE),
    }
}

/// Builds a lot info. The display name drops the leading type word
/// (`"Parkhaus Kaiserplatz"` -> `"Kaiserplatz"`).
fn lot_info(
    prefix: &str,
    entry: &ListEntry,
    page: LotPage,
    lot_url: &str,
    list_url: &str,
) -> Result<LotInfo, SourceError> {
    let display_name = entry
        .name
        .split_whitespace()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let display_name = if display_name.is_empty() {
        entry.name.clone()
    } else {
        display_name
    };

    let mut info = LotInfo::new(
        &format!("{prefix}-{}", entry.name),
        &display_name,
        guess_lot_type(&entry.name),
    )?
    .with_public_url(lot_url)
    .with_source_url(list_url)
    .with_capacity(page.capacity)
    .with_coordinates(page.latitude, page.longitude);
    if let Some(address) = page.address {
        info = info.with_address(address);
    }
    Ok(info)
}

#[async_trait]
impl ParkingSource for ApagSource {
    fn pool_info(&self) -> &PoolInfo {
        &self.pool
    }

    async fn get_lot_data(&self, fetcher: &Fetcher) -> Result<Vec<LotData>, SourceError> {
        let timestamp = now();
        let mut lots = Vec::new();
        for (prefix, path) in CITY_PAGES {
            let html = fetcher.get_text(&format!("{PUBLIC_URL}{path}")).await?;
            let entries = parse_list(&html)?;
            lots.extend(lot_data_from_entries(prefix, &entries, timestamp)?);
        }
        Ok(lots)
    }

    async fn get_lot_infos(&self, fetcher: &Fetcher) -> Result<Option<Vec<LotInfo>>, SourceError> {
        let mut infos = Vec::new();
        for (prefix, path) in CITY_PAGES {
            let list_url = format!("{PUBLIC_URL}{path}");
            let entries = parse_list(&fetcher.get_text(&list_url).await?)?;

            for entry in &entries {
                let href = entry.href.as_deref().ok_or_else(|| {
                    SourceError::extraction(format!("APAG lot '{}' has no detail link", entry.name))
                })?;
                let lot_url = format!("{}{href}", PUBLIC_URL.trim_end_matches('/'));
                let page = parse_lot_page(&fetcher.get_text(&lot_url).await?);
                infos.push(lot_info(prefix, entry, page, &lot_url, &list_url)?);
            }
        }
        Ok(Some(infos))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use park_api_parking_models::LotType;

    use super::*;

    const LIST: &str = r#"
        <div class="houses"><ul>
          <li><a href="/parkhaus-kaiserplatz">Parkhaus Kaiserplatz</a>
              <span class="free-text">120 frei</span></li>
          <li><a href="/tiefgarage-adalbertsteinweg">Tiefgarage Adalbertsteinweg</a>
              <span class="free-text">geschlossen</span></li>
          <li><a href="/parkhaus-kaiserplatz">Parkhaus Kaiserplatz</a>
              <span class="free-text">120 frei</span></li>
        </ul></div>"#;

    const DETAIL: &str = r#"
        <span class="total">Stellplätze gesamt: 300</span>
        <div class="address">Kaiserplatz<br>52062 Aachen</div>
        <meta itemprop="latitude" content="50.7753">
        <meta itemprop="longitude" content="6.0931">"#;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_list_and_drops_repeats() {
        let entries = parse_list(LIST).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].href.as_deref(), Some("/parkhaus-kaiserplatz"));
    }

    #[test]
    fn unreadable_free_count_is_nodata() {
        let lots = lot_data_from_entries("aachen", &parse_list(LIST).unwrap(), ts()).unwrap();
        assert_eq!(lots[0].id(), "aachen-parkhaus-kaiserplatz");
        assert_eq!(lots[0].status(), LotStatus::Open);
        assert_eq!(lots[0].num_free(), Some(120));
        assert_eq!(lots[1].status(), LotStatus::NoData);
        assert_eq!(lots[1].num_free(), None);
    }

    #[test]
    fn parses_detail_page() {
        let page = parse_lot_page(DETAIL);
        assert_eq!(page.capacity, Some(300));
        assert_eq!(page.address.as_deref(), Some("Kaiserplatz\n52062 Aachen"));
        assert_eq!(page.latitude, Some(50.7753));
    }

    #[test]
    fn builds_info_with_display_name() {
        let entry = &parse_list(LIST).unwrap()[0];
        let info = lot_info(
            "aachen",
            entry,
            parse_lot_page(DETAIL),
            "https://www.apag.de/parkhaus-kaiserplatz",
            "https://www.apag.de/parken-in-aachen",
        )
        .unwrap();
        assert_eq!(info.id, "aachen-parkhaus-kaiserplatz");
        assert_eq!(info.name, "Kaiserplatz");
        assert_eq!(info.lot_type, LotType::Garage);
        assert_eq!(info.capacity, Some(300));
    }

    #[test]
    fn missing_link_is_an_extraction_error() {
        let html = r#"<div class="houses"><ul><li>Parkhaus ohne Link</li></ul></div>"#;
        assert!(matches!(parse_list(html), Err(SourceError::Extraction { .. })));
    }
}
