//! Parking guidance system of the city of Dresden.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use park_api_parking_models::{LotData, LotStatus, PoolInfo};
use park_api_scraper::Fetcher;
use scraper::{ElementRef, Html, Selector};

use crate::html::{has_class, select_first, selector, text};
use crate::parsing::{int_or_none, now, timezone, to_utc_datetime};
use crate::{ParkingSource, SourceError};

const SOURCE_URL: &str = "https://www.dresden.de/apps_ext/ParkplatzApp/";

const UPDATED_HEADING: &str = "Letzte Aktualisierung";
const UPDATED_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Region tables that are not car parks.
const SKIPPED_REGIONS: &[&str] = &["Busparkplätze"];

static H3: LazyLock<Selector> = LazyLock::new(|| selector("h3"));
static TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static THEAD: LazyLock<Selector> = LazyLock::new(|| selector("thead"));
static HEAD_ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static TH: LazyLock<Selector> = LazyLock::new(|| selector("th"));
static DIV: LazyLock<Selector> = LazyLock::new(|| selector("div"));
static BODY_ROW: LazyLock<Selector> = LazyLock::new(|| selector("tbody > tr"));
static TD: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));

/// Dresden source. Lot metadata comes from the embedded geo-index.
pub struct DresdenSource {
    pool: PoolInfo,
}

impl DresdenSource {
    /// Creates the Dresden source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: PoolInfo::new("dresden", "Dresden")
                .with_public_url("https://www.dresden.de/parken")
                .with_source_url(SOURCE_URL),
        }
    }
}

impl Default for DresdenSource {
    fn default() -> Self {
        Self::new()
    }
}

fn last_updated(doc: &Html, tz: Tz) -> Result<Option<DateTime<Utc>>, SourceError> {
    let Some(heading) = doc.select(&H3).find(|h| text(*h) == UPDATED_HEADING) else {
        return Ok(None);
    };
    let Some(value) = heading
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "div")
    else {
        return Ok(None);
    };
    to_utc_datetime(&text(value), UPDATED_FORMAT, tz).map(Some)
}

/// Second `div` inside a cell, which holds the number.
fn cell_number(cell: ElementRef<'_>) -> Option<i64> {
    cell.select(&DIV).nth(1).and_then(|div| int_or_none(&text(div)))
}

fn region_name(table: ElementRef<'_>) -> Result<Option<String>, SourceError> {
    let Some(thead) = table.select(&THEAD).next() else {
        return Ok(None);
    };
    let row = select_first(thead, &HEAD_ROW, "Dresden table header row")?;
    let th = row
        .select(&TH)
        .nth(1)
        .ok_or_else(|| SourceError::extraction("Dresden table header without region column"))?;
    Ok(Some(text(select_first(th, &DIV, "Dresden region name")?)))
}

fn parse_row(
    row: ElementRef<'_>,
    timestamp: DateTime<Utc>,
    lot_timestamp: Option<DateTime<Utc>>,
) -> Result<LotData, SourceError> {
    let cells: Vec<_> = row.select(&TD).collect();
    if cells.len() < 4 {
        return Err(SourceError::extraction(format!(
            "Dresden lot row has {} cells, expected 4",
            cells.len()
        )));
    }
    let name = text(select_first(row, &LINK, "Dresden lot name")?);
    let capacity = cell_number(cells[2]);
    let num_free = cell_number(cells[3]);

    let status = if has_class(cells[0], "park-closed") {
        LotStatus::Closed
    } else if has_class(cells[0], "blue") && num_free.is_none() {
        LotStatus::NoData
    } else {
        LotStatus::Open
    };

    Ok(LotData::builder(timestamp, &format!("dresden-{name}"), status)
        .lot_timestamp(lot_timestamp)
        .num_free(num_free)
        .capacity(capacity)
        .build()?)
}

fn parse_lot_data(html: &str, timestamp: DateTime<Utc>, tz: Tz) -> Result<Vec<LotData>, SourceError> {
    let doc = Html::parse_document(html);
    let lot_timestamp = last_updated(&doc, tz)?;

    let mut lots = Vec::new();
    for table in doc.select(&TABLE) {
        let Some(region) = region_name(table)? else {
            continue;
        };
        if SKIPPED_REGIONS.contains(&region.as_str()) {
            log::debug!("dresden: skipping region '{region}'");
            continue;
        }

        for row in table.select(&BODY_ROW) {
            lots.push(parse_row(row, timestamp, lot_timestamp)?);
        }
    }

    if lots.is_empty() {
        return Err(SourceError::extraction("Dresden page contains no lot tables"));
    }
    Ok(lots)
}

#[async_trait]
impl ParkingSource for DresdenSource {
    fn pool_info(&self) -> &PoolInfo {
        &self.pool
    }

    async fn get_lot_data(&self, fetcher: &Fetcher) -> Result<Vec<LotData>, SourceError> {
        let html = fetcher.get_text(SOURCE_URL).await?;
        parse_lot_data(&html, now(), timezone(&self.pool.timezone)?)
    }

    fn static_lot_infos(&self) -> Option<&'static str> {
        Some(include_str!("dresden.geojson"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;
    use crate::geojson::lot_infos_from_geojson;

    const PAGE: &str = r##"
      <h3>Letzte Aktualisierung</h3>
      <div>01.03.2024 12:55:00</div>
      <table>
        <thead><tr><th></th><th><div>Innere Altstadt</div></th></tr></thead>
        <tbody>
          <tr>
            <td class="green"></td><td><a href="#">Altmarkt</a></td>
            <td><div>Plätze</div><div>400</div></td>
            <td><div>frei</div><div>120</div></td>
          </tr>
          <tr>
            <td class="park-closed"></td><td><a href="#">Frauenkirche Neumarkt</a></td>
            <td><div>Plätze</div><div>120</div></td>
            <td><div>frei</div><div>0</div></td>
          </tr>
          <tr>
            <td class="blue"></td><td><a href="#">Taschenbergpalais</a></td>
            <td><div>Plätze</div><div>140</div></td>
            <td><div>frei</div><div>Frei</div></td>
          </tr>
        </tbody>
      </table>
      <table>
        <thead><tr><th></th><th><div>Busparkplätze</div></th></tr></thead>
        <tbody>
          <tr>
            <td class="green"></td><td><a href="#">Bus Terrassenufer</a></td>
            <td><div>Plätze</div><div>10</div></td>
            <td><div>frei</div><div>4</div></td>
          </tr>
        </tbody>
      </table>
      <table><tr><td>Legende</td></tr></table>"##;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn parse() -> Vec<LotData> {
        parse_lot_data(PAGE, ts(), chrono_tz::Europe::Berlin).unwrap()
    }

    #[test]
    fn parses_lots_and_skips_bus_region() {
        let lots = parse();
        let ids: Vec<_> = lots.iter().map(LotData::id).collect();
        assert_eq!(
            ids,
            ["dresden-altmarkt", "dresden-frauenkirche-neumarkt", "dresden-taschenbergpalais"]
        );
        assert_eq!(lots[0].num_free(), Some(120));
        assert_eq!(lots[0].num_occupied(), Some(280));
        assert_eq!(lots[0].capacity(), Some(400));
    }

    #[test]
    fn lot_timestamp_is_converted_from_local_time() {
        let lots = parse();
        assert_eq!(
            lots[0].lot_timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 55, 0).unwrap())
        );
    }

    #[test]
    fn maps_cell_classes_to_status() {
        let lots = parse();
        assert_eq!(lots[0].status(), LotStatus::Open);
        assert_eq!(lots[1].status(), LotStatus::Closed);
        // "Frei" is no number: blue rows without a count have no data.
        assert_eq!(lots[2].status(), LotStatus::NoData);
        assert_eq!(lots[2].num_free(), None);
    }

    #[test]
    fn page_without_tables_is_an_extraction_error() {
        let err = parse_lot_data("<p>Wartung</p>", ts(), chrono_tz::Europe::Berlin).unwrap_err();
        assert_eq!(err.kind(), "ExtractionError");
    }

    #[test]
    fn geo_index_covers_parsed_lots() {
        let infos = lot_infos_from_geojson(DresdenSource::new().static_lot_infos().unwrap()).unwrap();
        for lot in parse() {
            assert!(infos.iter().any(|info| info.id == lot.id()), "{}", lot.id());
        }
    }
}
