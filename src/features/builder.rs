//! Feature vector construction for a single starter.

use std::collections::HashMap;

use crate::features::pedigree::Pedigree;
use crate::features::row::{FeatureRow, Features};
use crate::features::util::*;
use crate::features::venue::{ZensoFeatures, SMALL_TRACK_VENUES};
use crate::features::{ComboStats, PacePrediction, PastStats, RateStats, TrainingStats, TurnStats};
use crate::models::{EntryInfo, RaceInfo};

const BASE_WIN_RATE: f64 = 0.08;
const BASE_PLACE_RATE: f64 = 0.25;
const SIRE_CONFIDENCE_THRESHOLD: i64 = 50;
const SIRE_MAIDEN_CONFIDENCE_THRESHOLD: i64 = 30;
const SIRE_MAIDEN_BASE_WIN: f64 = 0.10;
const SIRE_MAIDEN_BASE_PLACE: f64 = 0.30;
const JOCKEY_MAIDEN_CONFIDENCE_THRESHOLD: i64 = 30;
const JOCKEY_RECENT_CONFIDENCE_THRESHOLD: f64 = 10.0;

/// Every batched lookup the builder draws from, borrowed for one extraction.
pub struct FeatureContext<'a> {
    pub past_stats: &'a HashMap<String, PastStats>,
    pub jockey_cache: &'a HashMap<String, RateStats>,
    pub trainer_cache: &'a HashMap<String, RateStats>,
    pub jockey_horse: &'a HashMap<String, ComboStats>,
    pub surface_stats: &'a HashMap<String, RateStats>,
    pub distance_stats: &'a HashMap<String, RateStats>,
    pub baba_stats: &'a HashMap<String, RateStats>,
    pub training_stats: &'a HashMap<String, TrainingStats>,
    pub interval_stats: &'a HashMap<String, RateStats>,
    pub turn_stats: &'a HashMap<String, TurnStats>,
    pub pace_predictions: &'a HashMap<String, PacePrediction>,
    pub entries_by_race: &'a HashMap<String, Vec<EntryInfo>>,
    pub pedigree: &'a HashMap<String, Pedigree>,
    pub venue_stats: &'a HashMap<String, RateStats>,
    pub zenso: &'a HashMap<String, ZensoFeatures>,
    pub jockey_recent: &'a HashMap<String, RateStats>,
    pub sire_stats: &'a HashMap<String, RateStats>,
    pub sire_maiden: &'a HashMap<String, RateStats>,
    pub jockey_maiden: &'a HashMap<String, RateStats>,
}

/// Build one feature row.
///
/// With `require_target` (training), entries without a numeric finishing
/// position in 1..=18 are skipped; on the prediction path the target is
/// simply absent.
pub fn build_features(
    entry: &EntryInfo,
    race: &RaceInfo,
    ctx: &FeatureContext<'_>,
    require_target: bool,
) -> Option<FeatureRow> {
    let chakujun: Option<i64> = {
        let raw = entry.kakutei_chakujun.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            None
        } else {
            raw.parse().ok().filter(|&c| (1..=18).contains(&c))
        }
    };
    if require_target && chakujun.is_none() {
        return None;
    }

    let kettonum = entry.ketto_toroku_bango.clone();
    let jockey_code = entry.kishu_code.as_str();
    let default_past = PastStats::default();
    let past = ctx.past_stats.get(&kettonum).unwrap_or(&default_past);

    let mut f = Features::default();

    // ===== basic info =====
    let umaban = entry.horse_number();
    f.wakuban = safe_f64(&entry.wakuban, 0.0);
    f.age = safe_f64(&entry.barei, 4.0);
    f.sex = encode_sex(&entry.seibetsu_code);
    f.kinryo = safe_f64(&entry.futan_juryo, 550.0) / 10.0;
    f.horse_weight = safe_f64(&entry.bataiju, 480.0);
    f.weight_diff = safe_f64(&entry.zogen_sa, 0.0);
    f.blinker = if entry.blinker_shiyo_kubun.trim() == "1" { 1.0 } else { 0.0 };

    // ===== last-10 performance =====
    f.speed_index_avg = calc_speed_index(past.avg_time);
    f.speed_index_max = calc_speed_index(past.best_time);
    f.speed_index_recent = calc_speed_index(past.recent_time);
    f.last3f_time_avg = past.avg_last3f;
    f.last3f_rank_avg = 5.0;
    let running_style = determine_style(past.avg_corner3);
    f.running_style = running_style as f64;
    f.position_avg_3f = past.avg_corner3;
    f.position_avg_4f = past.avg_corner4;
    f.win_rate = past.win_rate;
    f.place_rate = past.place_rate;
    f.win_count = past.win_count as f64;
    f.days_since_last_race =
        days_since_last(&past.last_race_date, &race.kaisai_nen, &race.kaisai_gappi) as f64;

    // decay-weighted variants and stability
    f.weighted_avg_rank = past.weighted_avg_rank;
    f.weighted_win_rate = past.weighted_win_rate;
    f.weighted_place_rate = past.weighted_place_rate;
    f.weighted_avg_last3f = past.weighted_avg_last3f;
    f.avg_position_change_3to4 = past.avg_position_change_3to4;
    f.std_position_change_3to4 = past.std_position_change_3to4;
    f.rank_stddev = past.rank_stddev;
    f.time_stddev = past.time_stddev;
    f.last3f_stddev = past.last3f_stddev;

    // ===== jockey / trainer =====
    let prior_rates = RateStats {
        runs: 0,
        win_rate: BASE_WIN_RATE,
        place_rate: BASE_PLACE_RATE,
    };
    let jockey_stats = ctx.jockey_cache.get(jockey_code).unwrap_or(&prior_rates);
    f.jockey_win_rate = jockey_stats.win_rate;
    f.jockey_place_rate = jockey_stats.place_rate;
    let trainer_stats = ctx
        .trainer_cache
        .get(entry.chokyoshi_code.as_str())
        .unwrap_or(&prior_rates);
    f.trainer_win_rate = trainer_stats.win_rate;
    f.trainer_place_rate = trainer_stats.place_rate;

    // Combo counts below 3 runs are noise; the cliff is deliberate
    // (weight suppression confirmed by attribution analysis).
    let combo_key = format!("{}_{}", jockey_code, kettonum);
    let combo = ctx.jockey_horse.get(&combo_key).copied().unwrap_or_default();
    if combo.runs >= 3 {
        f.jockey_horse_runs = (combo.runs.min(10)) as f64 / 10.0;
        f.jockey_horse_wins = combo.wins as f64 / combo.runs as f64;
    }

    f.jockey_change = if !past.last_jockey.is_empty() && past.last_jockey != jockey_code {
        1.0
    } else {
        0.0
    };

    // ===== workout data =====
    let default_training = TrainingStats::default();
    let train = ctx.training_stats.get(&kettonum).unwrap_or(&default_training);
    f.training_score = train.score;
    f.training_time_4f = train.time_4f;
    f.training_count = train.count as f64;
    f.training_efficiency = if train.count > 0 {
        (train.score / train.count.max(1) as f64) / 50.0
    } else {
        0.0
    };
    f.high_volume_training = if train.count >= 5 { 1.0 } else { 0.0 };
    f.distance_change = 0.0;

    // ===== course =====
    let is_turf = race.track_code.starts_with('1');
    f.is_turf = if is_turf { 1.0 } else { 0.0 };
    f.turf_win_rate = ctx
        .surface_stats
        .get(&format!("{}_turf", kettonum))
        .map(|s| s.win_rate)
        .unwrap_or(past.win_rate);
    f.dirt_win_rate = ctx
        .surface_stats
        .get(&format!("{}_dirt", kettonum))
        .map(|s| s.win_rate)
        .unwrap_or(past.win_rate);
    f.class_change = 0.0;
    f.avg_time_diff = (past.avg_rank - 1.0) * 0.2;
    f.best_finish = past.best_finish as f64;
    f.course_fit_score = 0.5;
    f.distance_fit_score = 0.5;
    f.class_rank = grade_to_rank(&race.grade_code);
    f.waku_bias = (f.wakuban - 4.5) * 0.02;

    // ===== distance category =====
    let distance = safe_i64(&race.kyori, 1600);
    let dist_key = format!("{}_{}", kettonum, distance_category(distance).as_str());
    if let Some(d) = ctx.distance_stats.get(&dist_key) {
        f.distance_cat_win_rate = d.win_rate;
        f.distance_cat_place_rate = d.place_rate;
        f.distance_cat_runs = d.runs as f64;
    }

    // ===== track condition =====
    let baba_name = if is_turf { "turf" } else { "dirt" };
    let baba_code = if is_turf {
        &race.shiba_babajotai_code
    } else {
        &race.dirt_babajotai_code
    };
    let baba_suffix = match baba_code.trim() {
        "2" => "yayaomo",
        "3" => "omo",
        "4" => "furyo",
        _ => "ryo",
    };
    let baba_key = format!("{}_{}_{}", kettonum, baba_name, baba_suffix);
    if let Some(b) = ctx.baba_stats.get(&baba_key) {
        f.baba_win_rate = b.win_rate;
        f.baba_place_rate = b.place_rate;
        f.baba_runs = b.runs as f64;
    } else {
        f.baba_win_rate = past.win_rate;
        f.baba_place_rate = past.place_rate;
        f.baba_runs = past.race_count as f64;
    }
    f.baba_condition = safe_f64(baba_code, 1.0);

    // ===== workout detail =====
    f.training_time_3f = train.time_3f;
    f.training_lap_1f = train.lap_1f;
    f.training_days_before = train.days_before as f64;
    let avg_1f = if train.time_3f > 0.0 { train.time_3f / 3.0 } else { 12.67 };
    f.training_finishing_accel = avg_1f - train.lap_1f;
    f.training_intensity = ((40.0 - train.time_3f) / 4.0).max(0.0);
    f.training_lap_quality = (13.5 - train.lap_1f).max(0.0);

    // ===== turn direction =====
    let keibajo = race.keibajo_code.as_str();
    let is_right_turn = matches!(keibajo, "01" | "02" | "03" | "06" | "08" | "09" | "10");
    let default_turn = TurnStats::default();
    let turn = ctx.turn_stats.get(&kettonum).unwrap_or(&default_turn);
    let (raw_rate, turn_runs) = if is_right_turn {
        (turn.right_turn_rate, turn.right_turn_runs)
    } else {
        (turn.left_turn_rate, turn.left_turn_runs)
    };
    const TURN_BASE_RATE: f64 = 0.25;
    const TURN_MIN_SAMPLES: i64 = 5;
    f.turn_direction_rate = if turn_runs >= TURN_MIN_SAMPLES {
        raw_rate
    } else if turn_runs >= 2 {
        let weight = turn_runs as f64 / TURN_MIN_SAMPLES as f64;
        weight * raw_rate + (1.0 - weight) * TURN_BASE_RATE
    } else {
        TURN_BASE_RATE
    };
    f.turn_direction_confidence = (turn_runs as f64 / TURN_MIN_SAMPLES as f64).min(1.0);

    // ===== rest interval =====
    let interval_cat = interval_category(f.days_since_last_race as i64);
    let interval_key = format!("{}_{}", kettonum, interval_cat.as_str());
    if let Some(i) = ctx.interval_stats.get(&interval_key) {
        f.interval_win_rate = i.win_rate;
        f.interval_place_rate = i.place_rate;
        f.interval_runs = i.runs as f64;
    } else {
        f.interval_win_rate = past.win_rate;
        f.interval_place_rate = past.place_rate;
    }
    f.interval_category = interval_cat.encoding();

    // ===== pace =====
    let pace = ctx
        .pace_predictions
        .get(&entry.race_code)
        .copied()
        .unwrap_or_default();
    f.pace_maker_count = pace.pace_maker_count as f64;
    f.senkou_count = pace.senkou_count as f64;
    f.sashi_count = pace.sashi_count as f64;
    f.pace_type = pace.pace_type as f64;
    f.style_pace_compatibility = style_pace_compatibility(running_style, pace.pace_type);

    f.field_size = ctx
        .entries_by_race
        .get(&entry.race_code)
        .map(|e| e.len() as f64)
        .unwrap_or(14.0);

    // ===== pedigree =====
    let default_pedigree = Pedigree::default();
    let pedigree = ctx.pedigree.get(&kettonum).unwrap_or(&default_pedigree);
    if !pedigree.sire_id.is_empty() {
        f.sire_id_hash = stable_hash(&pedigree.sire_id, 10000) as f64;
    }
    if !pedigree.broodmare_sire_id.is_empty() {
        f.broodmare_sire_id_hash = stable_hash(&pedigree.broodmare_sire_id, 10000) as f64;
    }

    let sire_key = format!(
        "{}_{}",
        pedigree.sire_id,
        if is_turf { "turf" } else { "dirt" }
    );
    let sire_default = RateStats {
        runs: 0,
        win_rate: BASE_WIN_RATE,
        place_rate: BASE_PLACE_RATE,
    };
    let sire = ctx.sire_stats.get(&sire_key).unwrap_or(&sire_default);
    let sire_confidence = log_confidence(sire.runs, SIRE_CONFIDENCE_THRESHOLD);
    f.sire_win_rate = blend_with_prior(sire.win_rate, BASE_WIN_RATE, sire_confidence);
    f.sire_place_rate = blend_with_prior(sire.place_rate, BASE_PLACE_RATE, sire_confidence);
    f.sire_runs = sire.runs.min(500) as f64;
    f.sire_confidence = sire_confidence;

    match ctx.sire_maiden.get(&pedigree.sire_id) {
        Some(m) => {
            let conf = log_confidence(m.runs, SIRE_MAIDEN_CONFIDENCE_THRESHOLD);
            f.sire_maiden_win_rate = blend_with_prior(m.win_rate, SIRE_MAIDEN_BASE_WIN, conf);
            f.sire_maiden_place_rate =
                blend_with_prior(m.place_rate, SIRE_MAIDEN_BASE_PLACE, conf);
            f.sire_maiden_runs = m.runs.min(300) as f64;
        }
        None => {
            f.sire_maiden_win_rate = SIRE_MAIDEN_BASE_WIN;
            f.sire_maiden_place_rate = SIRE_MAIDEN_BASE_PLACE;
        }
    }

    // ===== experience =====
    f.race_count = past.race_count.min(20) as f64;
    f.experience_category = if past.race_count == 0 {
        0.0
    } else if past.race_count <= 2 {
        1.0
    } else {
        2.0
    };

    // ===== previous races =====
    let default_zenso = ZensoFeatures::default();
    let zenso = ctx.zenso.get(&kettonum).unwrap_or(&default_zenso);
    f.zenso1_chakujun = zenso.zenso1_chakujun;
    f.zenso1_ninki = zenso.zenso1_ninki;
    f.zenso1_agari = zenso.zenso1_agari;
    f.zenso1_corner_avg = zenso.zenso1_corner_avg;
    f.zenso1_distance = zenso.zenso1_distance;
    f.zenso1_grade = zenso.zenso1_grade;
    f.zenso2_chakujun = zenso.zenso2_chakujun;
    f.zenso3_chakujun = zenso.zenso3_chakujun;
    f.zenso_chakujun_trend = zenso.zenso_chakujun_trend;
    f.zenso_agari_trend = zenso.zenso_agari_trend;
    f.zenso1_agari_rank = zenso.zenso1_agari_rank;
    f.zenso2_agari_rank = zenso.zenso2_agari_rank;
    f.avg_agari_rank_3 = zenso.avg_agari_rank_3;
    f.zenso1_position_up_1to2 = zenso.zenso1_position_up_1to2;
    f.zenso1_position_up_2to3 = zenso.zenso1_position_up_2to3;
    f.zenso1_position_up_3to4 = zenso.zenso1_position_up_3to4;
    f.zenso1_early_position_avg = zenso.zenso1_early_position_avg;
    f.zenso1_late_position_avg = zenso.zenso1_late_position_avg;
    f.late_push_tendency = zenso.late_push_tendency;
    f.zenso1_distance_diff = distance as f64 - zenso.zenso1_distance;
    f.zenso1_class_diff = f.class_rank - zenso.zenso1_grade;

    // ===== venue aptitude (>=3 runs or zeros) =====
    let surface_name = if is_turf { "shiba" } else { "dirt" };
    let venue_key = format!("{}_{}_{}", kettonum, keibajo, surface_name);
    if let Some(v) = ctx.venue_stats.get(&venue_key) {
        if v.runs >= 3 {
            f.venue_win_rate = v.win_rate;
            f.venue_place_rate = v.place_rate;
            f.venue_runs = v.runs.min(20) as f64 / 20.0;
        }
    }

    f.small_track_rate = zenso.small_track_rate;
    f.large_track_rate = zenso.large_track_rate;
    let is_small_track = SMALL_TRACK_VENUES.contains(&keibajo);
    f.track_type_fit = if is_small_track {
        f.small_track_rate
    } else {
        f.large_track_rate
    };

    // ===== in-race pace context =====
    let (mut inner_nige, mut inner_senkou) = (0u32, 0u32);
    if let Some(entries) = ctx.entries_by_race.get(&entry.race_code) {
        for e in entries {
            if e.horse_number() >= umaban {
                continue;
            }
            let e_style = ctx
                .past_stats
                .get(&e.ketto_toroku_bango)
                .map(|p| determine_style(p.avg_corner3))
                .unwrap_or(3);
            match e_style {
                1 => inner_nige += 1,
                2 => inner_senkou += 1,
                _ => {}
            }
        }
    }
    f.inner_nige_count = inner_nige as f64;
    f.inner_senkou_count = inner_senkou as f64;

    f.waku_style_advantage = match running_style {
        1 | 2 => {
            if umaban <= 4 {
                0.1
            } else if umaban >= 13 {
                -0.1
            } else {
                0.0
            }
        }
        _ => {
            if umaban <= 4 {
                -0.05
            } else if umaban >= 13 {
                0.05
            } else {
                0.0
            }
        }
    };

    // ===== jockey recent / maiden form =====
    let j_recent = ctx.jockey_recent.get(jockey_code).copied().unwrap_or(RateStats {
        runs: 0,
        win_rate: BASE_WIN_RATE,
        place_rate: BASE_PLACE_RATE,
    });
    let j_conf = (j_recent.runs as f64 / JOCKEY_RECENT_CONFIDENCE_THRESHOLD).min(1.0);
    f.jockey_recent_win_rate = blend_with_prior(j_recent.win_rate, BASE_WIN_RATE, j_conf);
    f.jockey_recent_place_rate = blend_with_prior(j_recent.place_rate, BASE_PLACE_RATE, j_conf);
    f.jockey_recent_runs = j_recent.runs.min(30) as f64;
    f.jockey_recent_confidence = j_conf;

    match ctx.jockey_maiden.get(jockey_code) {
        Some(m) => {
            let conf = log_confidence(m.runs, JOCKEY_MAIDEN_CONFIDENCE_THRESHOLD);
            f.jockey_maiden_win_rate = blend_with_prior(m.win_rate, BASE_WIN_RATE, conf);
            f.jockey_maiden_place_rate = blend_with_prior(m.place_rate, BASE_PLACE_RATE, conf);
            f.jockey_maiden_runs = m.runs.min(200) as f64;
        }
        None => {
            f.jockey_maiden_win_rate = BASE_WIN_RATE;
            f.jockey_maiden_place_rate = BASE_PLACE_RATE;
        }
    }

    // ===== seasonal encodings =====
    let month = safe_i64(race.kaisai_gappi.get(0..2).unwrap_or("06"), 6).clamp(1, 12);
    f.race_month = month as f64;
    let angle = 2.0 * std::f64::consts::PI * month as f64 / 12.0;
    f.month_sin = angle.sin();
    f.month_cos = angle.cos();

    // Meet week from the meet-day digits of the race code
    let nichime = safe_i64(entry.race_code.get(12..14).unwrap_or("01"), 1);
    f.kaisai_week = if nichime <= 2 {
        1.0
    } else if nichime >= 7 {
        3.0
    } else {
        2.0
    };

    let age = f.age as i64;
    f.growth_period = if (age == 3 && (3..=8).contains(&month))
        || (age == 4 && (1..=6).contains(&month))
    {
        1.0
    } else {
        0.0
    };
    f.is_winter = if month == 12 || month <= 2 { 1.0 } else { 0.0 };

    Some(FeatureRow {
        race_code: entry.race_code.clone(),
        umaban,
        bamei: entry.bamei.clone(),
        kettonum,
        target: chakujun.map(|c| c as f64),
        features: f,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn empty_ctx<'a>(
        maps: &'a (
            HashMap<String, PastStats>,
            HashMap<String, RateStats>,
            HashMap<String, ComboStats>,
            HashMap<String, TrainingStats>,
            HashMap<String, TurnStats>,
            HashMap<String, PacePrediction>,
            HashMap<String, Vec<EntryInfo>>,
            HashMap<String, Pedigree>,
            HashMap<String, ZensoFeatures>,
        ),
    ) -> FeatureContext<'a> {
        FeatureContext {
            past_stats: &maps.0,
            jockey_cache: &maps.1,
            trainer_cache: &maps.1,
            jockey_horse: &maps.2,
            surface_stats: &maps.1,
            distance_stats: &maps.1,
            baba_stats: &maps.1,
            training_stats: &maps.3,
            interval_stats: &maps.1,
            turn_stats: &maps.4,
            pace_predictions: &maps.5,
            entries_by_race: &maps.6,
            pedigree: &maps.7,
            venue_stats: &maps.1,
            zenso: &maps.8,
            jockey_recent: &maps.1,
            sire_stats: &maps.1,
            sire_maiden: &maps.1,
            jockey_maiden: &maps.1,
        }
    }

    fn sample_entry() -> EntryInfo {
        EntryInfo {
            race_code: "2023060506010205".to_string(),
            umaban: "05".to_string(),
            wakuban: "3".to_string(),
            ketto_toroku_bango: "2019104321".to_string(),
            bamei: "Test Horse".to_string(),
            seibetsu_code: "1".to_string(),
            barei: "4".to_string(),
            futan_juryo: "560".to_string(),
            kakutei_chakujun: "03".to_string(),
            ..Default::default()
        }
    }

    fn sample_race() -> RaceInfo {
        RaceInfo {
            race_code: "2023060506010205".to_string(),
            kaisai_nen: "2023".to_string(),
            kaisai_gappi: "0605".to_string(),
            keibajo_code: "05".to_string(),
            kyori: "1800".to_string(),
            track_code: "17".to_string(),
            grade_code: "E".to_string(),
            shiba_babajotai_code: "1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_aggregates_degrade_to_priors() {
        let maps = Default::default();
        let ctx = empty_ctx(&maps);
        let row = build_features(&sample_entry(), &sample_race(), &ctx, true).unwrap();
        let f = &row.features;
        assert_eq!(f.jockey_win_rate, 0.08);
        assert_eq!(f.jockey_place_rate, 0.25);
        assert_eq!(f.last3f_time_avg, 35.0);
        assert_eq!(f.turn_direction_rate, 0.25);
        assert_eq!(f.sire_maiden_win_rate, 0.10);
        assert_eq!(row.target, Some(3.0));
    }

    #[test]
    fn test_training_mode_skips_rows_without_target() {
        let maps = Default::default();
        let ctx = empty_ctx(&maps);
        let mut entry = sample_entry();
        entry.kakutei_chakujun = String::new();
        assert!(build_features(&entry, &sample_race(), &ctx, true).is_none());
        // prediction path keeps the row, just without a target
        let row = build_features(&entry, &sample_race(), &ctx, false).unwrap();
        assert_eq!(row.target, None);
    }

    #[test]
    fn test_combo_cliff_below_three_runs() {
        let mut maps: (
            HashMap<String, PastStats>,
            HashMap<String, RateStats>,
            HashMap<String, ComboStats>,
            HashMap<String, TrainingStats>,
            HashMap<String, TurnStats>,
            HashMap<String, PacePrediction>,
            HashMap<String, Vec<EntryInfo>>,
            HashMap<String, Pedigree>,
            HashMap<String, ZensoFeatures>,
        ) = Default::default();
        let mut entry = sample_entry();
        entry.kishu_code = "J1".to_string();
        maps.2.insert(
            "J1_2019104321".to_string(),
            ComboStats { runs: 2, wins: 2 },
        );
        let ctx = empty_ctx(&maps);
        let row = build_features(&entry, &sample_race(), &ctx, true).unwrap();
        assert_eq!(row.features.jockey_horse_runs, 0.0);
        assert_eq!(row.features.jockey_horse_wins, 0.0);

        maps.2.insert(
            "J1_2019104321".to_string(),
            ComboStats { runs: 5, wins: 2 },
        );
        let ctx = empty_ctx(&maps);
        let row = build_features(&entry, &sample_race(), &ctx, true).unwrap();
        assert_eq!(row.features.jockey_horse_runs, 0.5);
        assert_eq!(row.features.jockey_horse_wins, 0.4);
    }

    #[test]
    fn test_seasonal_flags() {
        let maps = Default::default();
        let ctx = empty_ctx(&maps);
        let mut race = sample_race();
        race.kaisai_gappi = "0105".to_string();
        let mut entry = sample_entry();
        entry.barei = "4".to_string();
        let row = build_features(&entry, &race, &ctx, true).unwrap();
        assert_eq!(row.features.is_winter, 1.0);
        assert_eq!(row.features.growth_period, 1.0);
        assert_eq!(row.features.race_month, 1.0);
    }
}
