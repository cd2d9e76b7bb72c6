//! Car park listings of the radio station HitRadio FFH.
//!
//! An overview page links one page per city; every city page lists its
//! facilities in a table with a nested detail table per row.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use park_api_parking_models::{LotData, LotInfo, LotStatus, LotType, PoolInfo, guess_lot_type};
use park_api_scraper::Fetcher;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::html::{child_elements, select_first, selector, text};
use crate::parsing::{int_or_none, now, timezone, to_utc_datetime};
use crate::{ParkingSource, SourceError};

const PUBLIC_URL: &str = "https://www.ffh.de/verkehr/parkhaeuser.html";

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y, %H:%M";
const TIMESTAMP_LEN: usize = 17;

static CITY_ROW: LazyLock<Selector> = LazyLock::new(|| selector("table#trafficParkingTable tr"));
static FACILITY_ROW: LazyLock<Selector> =
    LazyLock::new(|| selector("table#trafficParkingList tr[data-facilityid]"));
static TD: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static BOLD: LazyLock<Selector> = LazyLock::new(|| selector("b"));
static SUB_TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static SUB_ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));

/// One facility row of a city page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FacilityRow {
    facility_id: String,
    name: String,
    has_details: bool,
    capacity: Option<i64>,
    updated: Option<String>,
    address: Option<String>,
    free_text: String,
}

/// FFH source.
pub struct FfhSource {
    pool: PoolInfo,
}

impl FfhSource {
    /// Creates the FFH source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: PoolInfo::new("ffh", "HitRadio FFH Parkhaus-Info").with_public_url(PUBLIC_URL),
        }
    }

    async fn city_urls(&self, fetcher: &Fetcher) -> Result<Vec<String>, SourceError> {
        let html = fetcher.get_text(PUBLIC_URL).await?;
        parse_city_urls(&html, PUBLIC_URL)
    }
}

impl Default for FfhSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute city page urls from the overview table.
fn parse_city_urls(html: &str, base: &str) -> Result<Vec<String>, SourceError> {
    let base = Url::parse(base).map_err(|e| SourceError::extraction(format!("invalid url '{base}': {e}")))?;
    let doc = Html::parse_document(html);

    let mut urls = Vec::new();
    for row in doc.select(&CITY_ROW) {
        let Some(href) = row
            .select(&TD)
            .nth(1)
            .and_then(|cell| cell.select(&LINK).next())
            .and_then(|link| link.value().attr("href"))
        else {
            continue;
        };
        let url = base
            .join(href)
            .map_err(|e| SourceError::extraction(format!("invalid city link '{href}': {e}")))?;
        urls.push(url.to_string());
    }
    Ok(urls)
}

fn parse_facility(row: ElementRef<'_>, facility_id: &str) -> Result<FacilityRow, SourceError> {
    let cells = child_elements(row, "td");
    if cells.len() < 2 {
        return Err(SourceError::extraction(format!(
            "FFH facility '{facility_id}' has {} cells, expected 2",
            cells.len()
        )));
    }

    let sub_table = cells[0].select(&SUB_TABLE).next();
    let name_selector = if sub_table.is_some() { &*LINK } else { &*BOLD };
    let name = text(select_first(cells[0], name_selector, "FFH facility name")?);

    let mut facility = FacilityRow {
        facility_id: facility_id.to_string(),
        name,
        has_details: sub_table.is_some(),
        capacity: None,
        updated: None,
        address: None,
        free_text: text(cells[1]),
    };

    for sub_row in sub_table.iter().flat_map(|table| table.select(&SUB_ROW)) {
        let sub_cells: Vec<_> = sub_row.select(&TD).collect();
        let [label, value, ..] = sub_cells.as_slice() else {
            continue;
        };
        let label = text(*label);
        if label.contains("Plätze insgesamt") {
            facility.capacity = int_or_none(&text(*value));
        } else if label.contains("Stand:") {
            facility.updated = Some(text(*value).chars().take(TIMESTAMP_LEN).collect());
        } else if label.contains("Anfahrt:") {
            facility.address = Some(text(*value)).filter(|a| !a.is_empty());
        }
    }

    Ok(facility)
}

fn parse_city_page(html: &str) -> Result<Vec<FacilityRow>, SourceError> {
    let doc = Html::parse_document(html);
    doc.select(&FACILITY_ROW)
        .filter_map(|row| {
            row.value()
                .attr("data-facilityid")
                .filter(|id| !id.is_empty())
                .map(|id| parse_facility(row, id))
        })
        .collect()
}

/// Maps the free-places cell: a count, `belegt` (full) or `geschlossen`.
fn free_status(free_text: &str) -> (LotStatus, Option<i64>) {
    if let Some(num_free) = int_or_none(free_text) {
        (LotStatus::Open, Some(num_free))
    } else if free_text == "belegt" {
        (LotStatus::Open, Some(0))
    } else if free_text.contains("geschlossen") {
        (LotStatus::Closed, None)
    } else {
        (LotStatus::Unknown, None)
    }
}

fn lot_id(facility: &FacilityRow) -> String {
    format!("ffh-{}", facility.facility_id)
}

fn lot_data(facility: &FacilityRow, timestamp: DateTime<Utc>, tz: Tz) -> Result<LotData, SourceError> {
    let (status, num_free) = free_status(&facility.free_text);
    let lot_timestamp = facility
        .updated
        .as_deref()
        .map(|updated| to_utc_datetime(updated, TIMESTAMP_FORMAT, tz))
        .transpose()?;

    Ok(LotData::builder(timestamp, &lot_id(facility), status)
        .lot_timestamp(lot_timestamp)
        .num_free(num_free)
        .capacity(facility.capacity)
        .build()?)
}

fn lot_info(facility: &FacilityRow, city_url: &str) -> Result<LotInfo, SourceError> {
    let lot_type = guess_lot_type(&facility.name).unwrap_or(LotType::Unknown);
    let mut info = LotInfo::new(&lot_id(facility), &facility.name, Some(lot_type))?
        .with_public_url(city_url)
        .with_live_capacity(true);
    if facility.has_details {
        info = info.with_capacity(facility.capacity);
        if let Some(address) = &facility.address {
            info = info.with_address(address.clone());
        }
    }
    Ok(info)
}

#[async_trait]
impl ParkingSource for FfhSource {
    fn pool_info(&self) -> &PoolInfo {
        &self.pool
    }

    async fn get_lot_data(&self, fetcher: &Fetcher) -> Result<Vec<LotData>, SourceError> {
        let tz = timezone(&self.pool.timezone)?;
        let mut lots = Vec::new();
        for url in self.city_urls(fetcher).await? {
            let timestamp = now();
            for facility in parse_city_page(&fetcher.get_text(&url).await?)? {
                lots.push(lot_data(&facility, timestamp, tz)?);
            }
        }
        Ok(lots)
    }

    async fn get_lot_infos(&self, fetcher: &Fetcher) -> Result<Option<Vec<LotInfo>>, SourceError> {
        let mut infos = Vec::new();
        for url in self.city_urls(fetcher).await? {
            for facility in parse_city_page(&fetcher.get_text(&url).await?)? {
                infos.push(lot_info(&facility, &url)?);
            }
        }
        Ok(Some(infos))
    }
}
