//! Batch feature extraction.
//!
//! Turns the relational race history into fixed-schema feature rows, either
//! for a whole training year or for a single race to predict. Every
//! aggregate that could leak the target race's outcome is filtered in SQL
//! with `race_code < current_race_code`.

pub mod builder;
pub mod pedigree;
pub mod performance;
pub mod queries;
pub mod row;
pub mod util;
pub mod venue;

use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::models::{EntryInfo, RaceBundle, RaceInfo, Surface};
use builder::{build_features, FeatureContext};
use row::FeatureRow;
use util::determine_style;

/// Run counts with win / top-3 rates, the common shape of most splits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateStats {
    pub runs: i64,
    pub win_rate: f64,
    pub place_rate: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComboStats {
    pub runs: i64,
    pub wins: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct TurnStats {
    pub right_turn_rate: f64,
    pub left_turn_rate: f64,
    pub right_turn_runs: i64,
    pub left_turn_runs: i64,
}

impl Default for TurnStats {
    fn default() -> Self {
        Self {
            right_turn_rate: 0.25,
            left_turn_rate: 0.25,
            right_turn_runs: 0,
            left_turn_runs: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingStats {
    pub count: i64,
    pub score: f64,
    pub time_4f: f64,
    pub time_3f: f64,
    pub lap_1f: f64,
    pub days_before: i64,
}

impl Default for TrainingStats {
    fn default() -> Self {
        Self {
            count: 0,
            score: 50.0,
            time_4f: 52.0,
            time_3f: 38.0,
            lap_1f: 12.5,
            days_before: 7,
        }
    }
}

/// Last-10 aggregates for one horse. Defaults are the documented priors used
/// when a horse has no usable history.
#[derive(Debug, Clone)]
pub struct PastStats {
    pub race_count: i64,
    pub avg_rank: f64,
    pub win_rate: f64,
    pub place_rate: f64,
    pub win_count: i64,
    pub avg_time: Option<f64>,
    pub best_time: Option<f64>,
    pub recent_time: Option<f64>,
    pub avg_last3f: f64,
    pub best_last3f: f64,
    pub avg_corner3: f64,
    pub avg_corner4: f64,
    pub best_finish: i64,
    pub last_jockey: String,
    pub last_race_date: String,
    pub weighted_avg_rank: f64,
    pub weighted_win_rate: f64,
    pub weighted_place_rate: f64,
    pub weighted_avg_last3f: f64,
    pub avg_position_change_3to4: f64,
    pub std_position_change_3to4: f64,
    pub rank_stddev: f64,
    pub time_stddev: f64,
    pub last3f_stddev: f64,
}

impl Default for PastStats {
    fn default() -> Self {
        Self {
            race_count: 0,
            avg_rank: 8.0,
            win_rate: 0.0,
            place_rate: 0.0,
            win_count: 0,
            avg_time: None,
            best_time: None,
            recent_time: None,
            avg_last3f: 35.0,
            best_last3f: 35.0,
            avg_corner3: 8.0,
            avg_corner4: 8.0,
            best_finish: 10,
            last_jockey: String::new(),
            last_race_date: String::new(),
            weighted_avg_rank: 8.0,
            weighted_win_rate: 0.0,
            weighted_place_rate: 0.0,
            weighted_avg_last3f: 35.0,
            avg_position_change_3to4: 0.0,
            std_position_change_3to4: 0.0,
            rank_stddev: 5.0,
            time_stddev: 50.0,
            last3f_stddev: 2.0,
        }
    }
}

/// Predicted race shape from the field's running styles.
#[derive(Debug, Clone, Copy)]
pub struct PacePrediction {
    pub pace_maker_count: u32,
    pub senkou_count: u32,
    pub sashi_count: u32,
    /// 1 slow, 2 middle, 3 high
    pub pace_type: u8,
}

impl Default for PacePrediction {
    fn default() -> Self {
        Self {
            pace_maker_count: 1,
            senkou_count: 3,
            sashi_count: 5,
            pace_type: 2,
        }
    }
}

/// Count running styles in the field; two or more front runners force a
/// high pace, none at all lets the race go slow.
pub fn calc_pace_prediction(
    entries: &[EntryInfo],
    past_stats: &HashMap<String, PastStats>,
) -> PacePrediction {
    let (mut nige, mut senkou, mut sashi) = (0u32, 0u32, 0u32);
    for entry in entries {
        let avg_corner3 = past_stats
            .get(&entry.ketto_toroku_bango)
            .map(|p| p.avg_corner3)
            .unwrap_or(8.0);
        match determine_style(avg_corner3) {
            1 => nige += 1,
            2 => senkou += 1,
            3 => sashi += 1,
            _ => {}
        }
    }
    let pace_type = if nige >= 2 {
        3
    } else if nige == 0 {
        1
    } else {
        2
    };
    PacePrediction {
        pace_maker_count: nige,
        senkou_count: senkou,
        sashi_count: sashi,
        pace_type,
    }
}

/// Batch feature extractor. Holds nothing but the pool; all lookup caches
/// are scoped to a single extraction so leak-prevention state never crosses
/// calls.
pub struct FeatureExtractor<'a> {
    pool: &'a PgPool,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// One training year: one row per finalized starter, in race-code order.
    pub async fn extract_year(
        &self,
        year: i32,
        surface: Surface,
        max_races: i64,
    ) -> EngineResult<Vec<FeatureRow>> {
        info!("Extracting features for year {} [{}]", year, surface.as_str());

        let races = queries::finalized_races(self.pool, year, surface, max_races).await?;
        debug!("  target races: {}", races.len());
        if races.is_empty() {
            return Ok(Vec::new());
        }

        let race_codes: Vec<String> = races.iter().map(|r| r.race_code.clone()).collect();
        let entries = queries::finalized_entries(self.pool, &race_codes).await?;
        debug!("  entries: {}", entries.len());

        self.extract(&races, entries, year, true).await
    }

    /// One race on the prediction path: one row per declared starter.
    /// Scratched / registration-only entries (horse number 0) are dropped.
    pub async fn extract_race(&self, bundle: &RaceBundle) -> EngineResult<Vec<FeatureRow>> {
        let entries: Vec<EntryInfo> = bundle
            .horses
            .iter()
            .filter(|e| e.horse_number() >= 1)
            .cloned()
            .collect();
        let year: i32 = bundle
            .race
            .kaisai_nen
            .trim()
            .parse()
            .unwrap_or_else(|_| chrono::Utc::now().format("%Y").to_string().parse().unwrap_or(2024));

        self.extract(std::slice::from_ref(&bundle.race), entries, year, false)
            .await
    }

    async fn extract(
        &self,
        races: &[RaceInfo],
        entries: Vec<EntryInfo>,
        year: i32,
        require_target: bool,
    ) -> EngineResult<Vec<FeatureRow>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let kettonums: Vec<String> = {
            let mut seen = std::collections::HashSet::new();
            entries
                .iter()
                .map(|e| e.ketto_toroku_bango.clone())
                .filter(|k| !k.is_empty() && seen.insert(k.clone()))
                .collect()
        };
        let map = queries::horse_race_map(&entries);

        let past_stats = queries::past_stats_batch(self.pool, &kettonums, &map).await?;
        debug!("  past stats: {} horses", past_stats.len());

        let (jockey_cache, trainer_cache) =
            queries::jockey_trainer_caches(self.pool, year).await?;

        let jh_pairs: Vec<(String, String)> = entries
            .iter()
            .filter(|e| !e.kishu_code.is_empty() && !e.ketto_toroku_bango.is_empty())
            .map(|e| (e.kishu_code.clone(), e.ketto_toroku_bango.clone()))
            .collect();
        let jockey_horse = queries::jockey_horse_combo_batch(self.pool, &jh_pairs).await?;

        let surface_stats = performance::surface_stats_batch(self.pool, &kettonums, &map).await?;
        let turn_stats = performance::turn_stats_batch(self.pool, &kettonums, &map).await?;
        let baba_stats = performance::baba_stats_batch(self.pool, &kettonums, &map).await?;
        let interval_stats = performance::interval_stats_batch(self.pool, &kettonums, &map).await?;
        let distance_stats = performance::distance_stats_batch(self.pool, &kettonums, &map).await?;
        let training_stats = queries::training_stats_batch(self.pool, &kettonums).await?;

        let pedigree = pedigree::pedigree_batch(self.pool, &kettonums).await?;
        let sire_ids: Vec<String> = pedigree
            .values()
            .map(|p| p.sire_id.clone())
            .filter(|s| !s.is_empty())
            .collect();
        let sire_stats = pedigree::sire_stats_batch(self.pool, &sire_ids, year).await?;
        let sire_maiden = pedigree::sire_maiden_stats_batch(self.pool, &sire_ids, year).await?;

        let venue_stats = venue::venue_stats_batch(self.pool, &kettonums, &map).await?;
        let zenso = venue::zenso_batch(self.pool, &kettonums, &map).await?;

        let jockey_codes: Vec<String> = entries
            .iter()
            .map(|e| e.kishu_code.clone())
            .filter(|c| !c.is_empty())
            .collect();
        let jockey_recent = venue::jockey_recent_batch(self.pool, &jockey_codes, year).await?;
        let jockey_maiden =
            venue::jockey_maiden_stats_batch(self.pool, &jockey_codes, year).await?;

        // Group entries per race and predict the pace of each field
        let mut entries_by_race: HashMap<String, Vec<EntryInfo>> = HashMap::new();
        for entry in &entries {
            entries_by_race
                .entry(entry.race_code.clone())
                .or_default()
                .push(entry.clone());
        }
        let pace_predictions: HashMap<String, PacePrediction> = entries_by_race
            .iter()
            .map(|(rc, field)| (rc.clone(), calc_pace_prediction(field, &past_stats)))
            .collect();

        let races_by_code: HashMap<&str, &RaceInfo> =
            races.iter().map(|r| (r.race_code.as_str(), r)).collect();

        let ctx = FeatureContext {
            past_stats: &past_stats,
            jockey_cache: &jockey_cache,
            trainer_cache: &trainer_cache,
            jockey_horse: &jockey_horse,
            surface_stats: &surface_stats,
            distance_stats: &distance_stats,
            baba_stats: &baba_stats,
            training_stats: &training_stats,
            interval_stats: &interval_stats,
            turn_stats: &turn_stats,
            pace_predictions: &pace_predictions,
            entries_by_race: &entries_by_race,
            pedigree: &pedigree,
            venue_stats: &venue_stats,
            zenso: &zenso,
            jockey_recent: &jockey_recent,
            sire_stats: &sire_stats,
            sire_maiden: &sire_maiden,
            jockey_maiden: &jockey_maiden,
        };

        let mut rows = Vec::with_capacity(entries.len());
        for entry in &entries {
            let race = match races_by_code.get(entry.race_code.as_str()) {
                Some(r) => *r,
                None => continue,
            };
            if let Some(row) = build_features(entry, race, &ctx, require_target) {
                rows.push(row);
            }
        }

        info!("  feature rows built: {}", rows.len());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_style(umaban: &str, kettonum: &str) -> EntryInfo {
        EntryInfo {
            race_code: "2023060506010205".to_string(),
            umaban: umaban.to_string(),
            ketto_toroku_bango: kettonum.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pace_prediction_thresholds() {
        let entries = vec![
            entry_with_style("01", "A"),
            entry_with_style("02", "B"),
            entry_with_style("03", "C"),
        ];
        let mut past = HashMap::new();
        // Two front runners force a high pace call
        past.insert("A".to_string(), PastStats { avg_corner3: 1.0, ..Default::default() });
        past.insert("B".to_string(), PastStats { avg_corner3: 2.0, ..Default::default() });
        past.insert("C".to_string(), PastStats { avg_corner3: 9.0, ..Default::default() });
        let pace = calc_pace_prediction(&entries, &past);
        assert_eq!(pace.pace_maker_count, 2);
        assert_eq!(pace.pace_type, 3);

        // No front runner at all means a slow pace
        past.insert("A".to_string(), PastStats { avg_corner3: 6.0, ..Default::default() });
        past.insert("B".to_string(), PastStats { avg_corner3: 6.0, ..Default::default() });
        let pace = calc_pace_prediction(&entries, &past);
        assert_eq!(pace.pace_maker_count, 0);
        assert_eq!(pace.pace_type, 1);
    }
}
