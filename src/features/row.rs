//! Typed feature schema.
//!
//! The macro fixes the numeric column list at compile time; the trainer
//! serializes the ordering into the artifact so inference can reconstruct
//! vectors by name even across schema drift (unknown names fill 0).

macro_rules! feature_schema {
    ($($name:ident),+ $(,)?) => {
        /// Numeric feature vector for one starter.
        #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
        pub struct Features {
            $(pub $name: f64,)+
        }

        impl Features {
            /// Canonical column order.
            pub const NAMES: &'static [&'static str] = &[$(stringify!($name)),+];

            /// Value by column name, for artifact-ordered lookups.
            pub fn get(&self, name: &str) -> Option<f64> {
                match name {
                    $(stringify!($name) => Some(self.$name),)+
                    _ => None,
                }
            }

            /// Values in canonical order.
            pub fn values(&self) -> Vec<f64> {
                vec![$(self.$name),+]
            }
        }
    };
}

feature_schema! {
    // basic entry info
    wakuban,
    age,
    sex,
    kinryo,
    horse_weight,
    weight_diff,
    blinker,
    // last-10 performance aggregates
    speed_index_avg,
    speed_index_max,
    speed_index_recent,
    last3f_time_avg,
    last3f_rank_avg,
    running_style,
    position_avg_3f,
    position_avg_4f,
    win_rate,
    place_rate,
    win_count,
    days_since_last_race,
    // time-decay weighted variants and stability
    weighted_avg_rank,
    weighted_win_rate,
    weighted_place_rate,
    weighted_avg_last3f,
    avg_position_change_3to4,
    std_position_change_3to4,
    rank_stddev,
    time_stddev,
    last3f_stddev,
    // jockey / trainer
    jockey_win_rate,
    jockey_place_rate,
    trainer_win_rate,
    trainer_place_rate,
    jockey_horse_runs,
    jockey_horse_wins,
    jockey_change,
    // workout data
    training_score,
    training_time_4f,
    training_count,
    training_intensity,
    training_efficiency,
    high_volume_training,
    distance_change,
    // course
    is_turf,
    turf_win_rate,
    dirt_win_rate,
    class_change,
    avg_time_diff,
    best_finish,
    course_fit_score,
    distance_fit_score,
    class_rank,
    field_size,
    waku_bias,
    // distance category splits
    distance_cat_win_rate,
    distance_cat_place_rate,
    distance_cat_runs,
    // track condition splits
    baba_win_rate,
    baba_place_rate,
    baba_runs,
    baba_condition,
    // workout detail
    training_time_3f,
    training_lap_1f,
    training_days_before,
    training_finishing_accel,
    training_lap_quality,
    // turn direction
    turn_direction_rate,
    turn_direction_confidence,
    // rest interval splits
    interval_win_rate,
    interval_place_rate,
    interval_runs,
    interval_category,
    // pace
    pace_maker_count,
    senkou_count,
    sashi_count,
    pace_type,
    style_pace_compatibility,
    // pedigree
    sire_id_hash,
    broodmare_sire_id_hash,
    sire_win_rate,
    sire_place_rate,
    sire_runs,
    sire_confidence,
    sire_maiden_win_rate,
    sire_maiden_place_rate,
    sire_maiden_runs,
    // experience
    race_count,
    experience_category,
    // previous race details
    zenso1_chakujun,
    zenso1_ninki,
    zenso1_agari,
    zenso1_corner_avg,
    zenso1_distance,
    zenso1_grade,
    zenso2_chakujun,
    zenso3_chakujun,
    zenso_chakujun_trend,
    zenso_agari_trend,
    zenso1_agari_rank,
    zenso2_agari_rank,
    avg_agari_rank_3,
    zenso1_position_up_1to2,
    zenso1_position_up_2to3,
    zenso1_position_up_3to4,
    zenso1_early_position_avg,
    zenso1_late_position_avg,
    late_push_tendency,
    zenso1_distance_diff,
    zenso1_class_diff,
    // venue aptitude
    venue_win_rate,
    venue_place_rate,
    venue_runs,
    small_track_rate,
    large_track_rate,
    track_type_fit,
    // in-race pace context
    inner_nige_count,
    inner_senkou_count,
    waku_style_advantage,
    // jockey recent / maiden form
    jockey_recent_win_rate,
    jockey_recent_place_rate,
    jockey_recent_runs,
    jockey_recent_confidence,
    jockey_maiden_win_rate,
    jockey_maiden_place_rate,
    jockey_maiden_runs,
    // seasonal encodings
    race_month,
    month_sin,
    month_cos,
    kaisai_week,
    growth_period,
    is_winter,
}

/// One starter's feature vector plus the identifiers the trainer and
/// evaluator group by. Identifiers never enter the model input.
#[derive(Debug, Clone, Default)]
pub struct FeatureRow {
    pub race_code: String,
    pub umaban: u32,
    pub bamei: String,
    pub kettonum: String,
    /// Finishing position when finalized; `None` on the prediction path.
    pub target: Option<f64>,
    pub features: Features,
}

impl FeatureRow {
    /// Vector in the order an artifact expects. Names the schema no longer
    /// carries fill with 0, matching the training-side fillna.
    pub fn vector_for(&self, names: &[String]) -> Vec<f64> {
        names
            .iter()
            .map(|n| self.features.get(n).unwrap_or(0.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_and_values_align() {
        let mut f = Features::default();
        f.wakuban = 3.0;
        f.is_winter = 1.0;
        let values = f.values();
        assert_eq!(values.len(), Features::NAMES.len());
        assert_eq!(f.get("wakuban"), Some(3.0));
        assert_eq!(f.get("is_winter"), Some(1.0));
        assert_eq!(f.get("no_such_feature"), None);
        let idx = Features::NAMES.iter().position(|n| *n == "wakuban").unwrap();
        assert_eq!(values[idx], 3.0);
    }

    #[test]
    fn test_vector_for_unknown_names_fill_zero() {
        let row = FeatureRow {
            features: Features {
                win_rate: 0.2,
                ..Default::default()
            },
            ..Default::default()
        };
        let names = vec!["win_rate".to_string(), "retired_feature".to_string()];
        assert_eq!(row.vector_for(&names), vec![0.2, 0.0]);
    }
}
