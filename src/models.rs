use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Track surface variants a model artifact can be trained for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Mixed,
    Turf,
    Dirt,
}

impl Surface {
    pub fn as_str(&self) -> &str {
        match self {
            Surface::Mixed => "mixed",
            Surface::Turf => "turf",
            Surface::Dirt => "dirt",
        }
    }

    /// Parse a CLI / env value. `mixed` and empty both mean "no filter".
    pub fn parse(s: &str) -> Option<Surface> {
        match s {
            "" | "mixed" | "all" => Some(Surface::Mixed),
            "turf" => Some(Surface::Turf),
            "dirt" => Some(Surface::Dirt),
            _ => None,
        }
    }

    /// Surface of a race from its track code.
    ///
    /// Track codes 10-22 are turf, 24-27 and 51 are dirt; everything else
    /// (jumps courses and unknowns) never matches a surface filter.
    pub fn from_track_code(track_code: &str) -> Option<Surface> {
        let tc: u32 = track_code.trim().parse().ok()?;
        match tc {
            10..=22 => Some(Surface::Turf),
            24..=27 | 51 => Some(Surface::Dirt),
            _ => None,
        }
    }

    /// SQL fragment restricting `race_shosai.track_code` to this surface.
    pub fn sql_filter(&self) -> Option<&'static str> {
        match self {
            Surface::Mixed => None,
            Surface::Turf => Some("track_code::int BETWEEN 10 AND 23"),
            Surface::Dirt => Some("(track_code::int IN (24, 25, 26, 27) OR track_code = '51')"),
        }
    }
}

/// Ticket types the odds endpoint understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Win,
    Place,
    Quinella,
}

impl TicketType {
    pub fn as_str(&self) -> &str {
        match self {
            TicketType::Win => "win",
            TicketType::Place => "place",
            TicketType::Quinella => "quinella",
        }
    }

    pub fn parse(s: &str) -> Option<TicketType> {
        match s {
            "win" | "tansho" => Some(TicketType::Win),
            "place" | "fukusho" => Some(TicketType::Place),
            "quinella" | "umaren" => Some(TicketType::Quinella),
            _ => None,
        }
    }
}

/// Race header row from the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaceInfo {
    pub race_code: String,
    pub kaisai_nen: String,
    pub kaisai_gappi: String,
    pub keibajo_code: String,
    pub race_bango: String,
    pub kyoso_mei: String,
    pub kyori: String,
    pub track_code: String,
    pub grade_code: String,
    pub shiba_babajotai_code: String,
    pub dirt_babajotai_code: String,
    pub tenko_code: String,
    pub hasso_jikoku: String,
    pub kyoso_joken_code: String,
    pub kyoso_shubetsu_code: String,
    pub data_kubun: String,
}

/// One declared starter, joined with the jockey master for display names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryInfo {
    pub race_code: String,
    pub umaban: String,
    pub wakuban: String,
    pub ketto_toroku_bango: String,
    pub bamei: String,
    pub seibetsu_code: String,
    pub barei: String,
    pub futan_juryo: String,
    pub blinker_shiyo_kubun: String,
    pub kishu_code: String,
    pub kishumei: String,
    pub chokyoshi_code: String,
    pub bataiju: String,
    pub zogen_sa: String,
    pub tansho_odds: String,
    pub kakutei_chakujun: String,
}

impl EntryInfo {
    /// Declared horse number, or 0 for scratched / registration-only entries.
    pub fn horse_number(&self) -> u32 {
        self.umaban.trim().parse().unwrap_or(0)
    }
}

/// Everything the prediction path needs about one race, fetched in a single
/// aggregation call.
#[derive(Debug, Clone, Default)]
pub struct RaceBundle {
    pub race: RaceInfo,
    pub horses: Vec<EntryInfo>,
}

/// Race code layout: YYYYMMDD + venue(2) + meet-index(2) + meet-day(2) + race(2).
pub fn race_code_date(race_code: &str) -> Option<NaiveDate> {
    if race_code.len() < 8 {
        return None;
    }
    let year: i32 = race_code.get(0..4)?.parse().ok()?;
    let month: u32 = race_code.get(4..6)?.parse().ok()?;
    let day: u32 = race_code.get(6..8)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Venue code portion of a race code (digits 9-10).
pub fn race_code_venue(race_code: &str) -> &str {
    race_code.get(8..10).unwrap_or("00")
}

/// Meeting code: race code with the trailing race number removed. This is the
/// key the track-condition snapshots are stored under.
pub fn race_code_meeting(race_code: &str) -> &str {
    race_code.get(..14).unwrap_or(race_code)
}

pub fn is_valid_race_code(race_code: &str) -> bool {
    race_code.len() == 16 && race_code.bytes().all(|b| b.is_ascii_digit())
}

/// Venue display name for a two-digit venue code.
pub fn venue_name(venue_code: &str) -> &'static str {
    match venue_code {
        "01" => "Sapporo",
        "02" => "Hakodate",
        "03" => "Fukushima",
        "04" => "Niigata",
        "05" => "Tokyo",
        "06" => "Nakayama",
        "07" => "Chukyo",
        "08" => "Kyoto",
        "09" => "Hanshin",
        "10" => "Kokura",
        _ => "Unknown",
    }
}

/// Database access mode: `local` talks to PostgreSQL, `mock` short-circuits
/// the prediction facade with deterministic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbMode {
    Local,
    Mock,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub db_pool_min_size: u32,
    pub db_pool_max_size: u32,
    pub db_mode: DbMode,
    pub port: u16,
    pub model_dir: std::path::PathBuf,
    pub bias_date: Option<String>,
    pub retrain_enabled: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let db_host = std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());

        let db_port = std::env::var("DB_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse()
            .unwrap_or(5432);

        let db_name = std::env::var("DB_NAME").unwrap_or_else(|_| "keiba".to_string());
        let db_user = std::env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
        let db_password = std::env::var("DB_PASSWORD").unwrap_or_default();

        let db_pool_min_size = std::env::var("DB_POOL_MIN_SIZE")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .unwrap_or(2);

        let db_pool_max_size = std::env::var("DB_POOL_MAX_SIZE")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let db_mode = match std::env::var("DB_MODE").as_deref() {
            Ok("mock") => DbMode::Mock,
            _ => DbMode::Local,
        };

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let model_dir = std::env::var("MODEL_PATH")
            .unwrap_or_else(|_| "models".to_string())
            .into();

        let bias_date = std::env::var("KEIBA_BIAS_DATE")
            .ok()
            .filter(|s| !s.is_empty());

        let retrain_enabled = std::env::var("RETRAIN_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        Ok(Self {
            db_host,
            db_port,
            db_name,
            db_user,
            db_password,
            db_pool_min_size,
            db_pool_max_size,
            db_mode,
            port,
            model_dir,
            bias_date,
            retrain_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_race_code_parts() {
        let rc = "2025012506010911";
        assert!(is_valid_race_code(rc));
        assert_eq!(race_code_date(rc), NaiveDate::from_ymd_opt(2025, 1, 25));
        assert_eq!(race_code_venue(rc), "06");
        assert_eq!(race_code_meeting(rc), "20250125060109");
    }

    #[test]
    fn test_surface_from_track_code() {
        assert_eq!(Surface::from_track_code("11"), Some(Surface::Turf));
        assert_eq!(Surface::from_track_code("24"), Some(Surface::Dirt));
        assert_eq!(Surface::from_track_code("51"), Some(Surface::Dirt));
        assert_eq!(Surface::from_track_code("53"), None);
        assert_eq!(Surface::from_track_code(""), None);
    }

    #[test]
    fn test_ticket_type_parse() {
        assert_eq!(TicketType::parse("win"), Some(TicketType::Win));
        assert_eq!(TicketType::parse("umaren"), Some(TicketType::Quinella));
        assert_eq!(TicketType::parse("trifecta"), None);
    }
}
