//! Prediction response assembly: ranked horses, auxiliary rankings, dark
//! horses and the persisted result structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{race_code_venue, venue_name, RaceBundle};
use crate::predict::probability::{
    horse_confidence, position_distribution, race_confidence, HorseScore,
};

/// Second and third are absent for regressor-only artifacts, which provide
/// no classifier mass to split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDistribution {
    pub first: f64,
    pub second: Option<f64>,
    pub third: Option<f64>,
    pub out_of_place: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedHorse {
    pub rank: u32,
    pub horse_number: u32,
    pub horse_name: String,
    pub horse_sex: Option<String>,
    pub horse_age: Option<u32>,
    pub jockey_name: Option<String>,
    pub win_probability: f64,
    /// Absent when the artifact has no classifier heads to derive it from.
    pub quinella_probability: Option<f64>,
    pub place_probability: Option<f64>,
    pub position_distribution: PositionDistribution,
    pub rank_score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxRankingEntry {
    pub rank: u32,
    pub horse_number: u32,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkHorse {
    pub horse_number: u32,
    pub win_prob: f64,
    pub place_prob: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub ranked_horses: Vec<RankedHorse>,
    pub quinella_ranking: Option<Vec<AuxRankingEntry>>,
    pub place_ranking: Option<Vec<AuxRankingEntry>>,
    pub dark_horses: Option<Vec<DarkHorse>>,
    pub prediction_confidence: f64,
    pub model_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction_id: String,
    pub race_id: String,
    pub race_name: String,
    pub race_date: String,
    pub venue: String,
    pub race_number: String,
    pub race_time: String,
    pub prediction_result: PredictionResult,
    pub predicted_at: DateTime<Utc>,
    pub is_final: bool,
}

fn sex_label(code: &str) -> Option<String> {
    match code.trim() {
        "1" => Some("colt".to_string()),
        "2" => Some("filly".to_string()),
        "3" => Some("gelding".to_string()),
        _ => None,
    }
}

/// Race-name fallback synthesized from the condition codes when the header
/// carries no name (common for lower-class races).
pub fn resolve_race_name(race: &crate::models::RaceInfo) -> String {
    let name = race.kyoso_mei.trim();
    if !name.is_empty() {
        return name.to_string();
    }

    let is_maiden = matches!(race.kyoso_joken_code.as_str(), "701" | "702" | "703");
    let age_part = match (race.kyoso_shubetsu_code.as_str(), is_maiden) {
        ("11", _) => "2yo",
        ("12", _) => "3yo",
        ("13", true) => "3yo",
        ("13", false) => "3yo+",
        ("14", true) => "4yo",
        ("14", false) => "4yo+",
        _ => "",
    };
    let class_part = match race.kyoso_joken_code.as_str() {
        "005" => "1-win class",
        "010" => "2-win class",
        "016" => "3-win class",
        "701" => "newcomer",
        "702" => "unraced",
        "703" => "maiden",
        "999" => "open",
        _ => "allowance",
    };
    let combined = format!("{} {}", age_part, class_part).trim().to_string();
    if combined.is_empty() {
        "allowance".to_string()
    } else {
        combined
    }
}

/// Build the ranked prediction result from normalized per-horse scores.
///
/// Horses are ordered by win probability (not rank score) so the displayed
/// probability always agrees with the ranking.
pub fn generate_ranking(
    bundle: &RaceBundle,
    mut scores: Vec<HorseScore>,
    model_info: &str,
) -> PredictionResult {
    scores.sort_by(|a, b| {
        b.win_probability
            .partial_cmp(&a.win_probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let by_number: std::collections::HashMap<u32, &crate::models::EntryInfo> = bundle
        .horses
        .iter()
        .map(|e| (e.horse_number(), e))
        .collect();

    let mut ranked_horses = Vec::with_capacity(scores.len());
    for (i, score) in scores.iter().enumerate() {
        let rank = (i + 1) as u32;
        let entry = by_number.get(&score.horse_number);

        let (first, second, third, out) = position_distribution(
            score.win_probability,
            score.quinella_probability,
            score.place_probability,
            rank as usize,
        );

        // Prefer the model's value; fall back to the distribution when only
        // the quinella head is missing. With no classifier heads at all,
        // both stay absent.
        let quinella_probability = score
            .quinella_probability
            .or_else(|| second.map(|s| (first + s).min(1.0)));
        let place_probability = score.place_probability.or_else(|| {
            second
                .zip(third)
                .map(|(s, t)| (first + s + t).min(1.0))
        });

        let gap = scores
            .get(i + 1)
            .map(|next| score.win_probability - next.win_probability);
        let confidence = horse_confidence(gap);

        ranked_horses.push(RankedHorse {
            rank,
            horse_number: score.horse_number,
            horse_name: entry
                .map(|e| e.bamei.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            horse_sex: entry.and_then(|e| sex_label(&e.seibetsu_code)),
            horse_age: entry.and_then(|e| e.barei.trim().parse().ok()),
            jockey_name: entry
                .map(|e| e.kishumei.trim().to_string())
                .filter(|n| !n.is_empty()),
            win_probability: score.win_probability,
            quinella_probability,
            place_probability,
            position_distribution: PositionDistribution {
                first,
                second,
                third,
                out_of_place: out,
            },
            rank_score: score.rank_score,
            confidence,
        });
    }

    let sorted_win: Vec<f64> = ranked_horses.iter().map(|h| h.win_probability).collect();
    let prediction_confidence = race_confidence(&sorted_win);

    let quinella_ranking = build_aux_ranking(
        ranked_horses
            .iter()
            .filter_map(|h| h.quinella_probability.map(|p| (h.horse_number, p))),
    );
    let place_ranking = build_aux_ranking(
        ranked_horses
            .iter()
            .filter_map(|h| h.place_probability.map(|p| (h.horse_number, p))),
    );

    // High place probability but little chance to win: can hit the board
    // without winning. Only meaningful when place probabilities exist.
    let dark_horses: Option<Vec<DarkHorse>> = place_ranking.as_ref().map(|_| {
        ranked_horses
            .iter()
            .filter_map(|h| {
                let place_prob = h.place_probability?;
                if place_prob >= 0.20 && h.win_probability < 0.10 {
                    Some(DarkHorse {
                        horse_number: h.horse_number,
                        win_prob: h.win_probability,
                        place_prob,
                    })
                } else {
                    None
                }
            })
            .take(3)
            .collect()
    });

    PredictionResult {
        ranked_horses,
        quinella_ranking,
        place_ranking,
        dark_horses,
        prediction_confidence,
        model_info: model_info.to_string(),
    }
}

/// Top-5 by probability, ranked; `None` when no horse carries a value
/// (regressor-only artifacts emit no auxiliary rankings).
fn build_aux_ranking(
    entries: impl Iterator<Item = (u32, f64)>,
) -> Option<Vec<AuxRankingEntry>> {
    let mut ranking: Vec<AuxRankingEntry> = entries
        .map(|(horse_number, probability)| AuxRankingEntry {
            rank: 0,
            horse_number,
            probability,
        })
        .collect();
    if ranking.is_empty() {
        return None;
    }
    ranking.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranking.truncate(5);
    for (i, entry) in ranking.iter_mut().enumerate() {
        entry.rank = (i + 1) as u32;
    }
    Some(ranking)
}

/// Wrap a result with race identity and timing for the API.
pub fn build_response(
    bundle: &RaceBundle,
    result: PredictionResult,
    is_final: bool,
) -> PredictionResponse {
    let race = &bundle.race;
    let race_date = if race.kaisai_nen.len() == 4 && race.kaisai_gappi.len() == 4 {
        format!(
            "{}-{}-{}",
            race.kaisai_nen,
            &race.kaisai_gappi[..2],
            &race.kaisai_gappi[2..]
        )
    } else {
        Utc::now().format("%Y-%m-%d").to_string()
    };

    PredictionResponse {
        prediction_id: String::new(), // assigned on save
        race_id: race.race_code.clone(),
        race_name: resolve_race_name(race),
        race_date,
        venue: venue_name(race_code_venue(&race.race_code)).to_string(),
        race_number: race.race_bango.trim_start_matches('0').to_string(),
        race_time: if race.hasso_jikoku.trim().is_empty() {
            "00:00".to_string()
        } else {
            race.hasso_jikoku.clone()
        },
        prediction_result: result,
        predicted_at: Utc::now(),
        is_final,
    }
}

/// Deterministic mock response for `DB_MODE=mock`.
pub fn mock_prediction(race_id: &str, is_final: bool) -> PredictionResponse {
    let mock_board: [(u32, u32, &str, f64); 5] = [
        (1, 1, "MockHorse1", 0.30),
        (2, 5, "MockHorse5", 0.22),
        (3, 3, "MockHorse3", 0.16),
        (4, 7, "MockHorse7", 0.14),
        (5, 2, "MockHorse2", 0.12),
    ];

    let ranked_horses: Vec<RankedHorse> = mock_board
        .iter()
        .map(|&(rank, horse_number, name, win_prob)| RankedHorse {
            rank,
            horse_number,
            horse_name: name.to_string(),
            horse_sex: None,
            horse_age: None,
            jockey_name: None,
            win_probability: win_prob,
            quinella_probability: Some((win_prob * 1.8).min(0.5)),
            place_probability: Some((win_prob * 2.5).min(0.6)),
            position_distribution: PositionDistribution {
                first: win_prob,
                second: Some(win_prob * 0.8),
                third: Some(win_prob * 0.6),
                out_of_place: (1.0 - win_prob * 2.4).max(0.0),
            },
            rank_score: rank as f64,
            confidence: 0.7 - rank as f64 * 0.05,
        })
        .collect();

    PredictionResponse {
        prediction_id: uuid::Uuid::new_v4().to_string(),
        race_id: race_id.to_string(),
        race_name: "MockRace".to_string(),
        race_date: Utc::now().format("%Y-%m-%d").to_string(),
        venue: "Tokyo".to_string(),
        race_number: "11".to_string(),
        race_time: "15:40".to_string(),
        prediction_result: PredictionResult {
            ranked_horses,
            quinella_ranking: None,
            place_ranking: None,
            dark_horses: None,
            prediction_confidence: 0.72,
            model_info: "mock_model".to_string(),
        },
        predicted_at: Utc::now(),
        is_final,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryInfo, RaceInfo};

    fn bundle_with_horses(numbers: &[u32]) -> RaceBundle {
        RaceBundle {
            race: RaceInfo {
                race_code: "2025012506010911".to_string(),
                kaisai_nen: "2025".to_string(),
                kaisai_gappi: "0125".to_string(),
                race_bango: "11".to_string(),
                hasso_jikoku: "15:40".to_string(),
                ..Default::default()
            },
            horses: numbers
                .iter()
                .map(|&n| EntryInfo {
                    umaban: format!("{:02}", n),
                    bamei: format!("Horse{}", n),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn score(n: u32, win: f64, quinella: f64, place: f64) -> HorseScore {
        HorseScore {
            horse_number: n,
            rank_score: win * 10.0,
            win_probability: win,
            quinella_probability: Some(quinella),
            place_probability: Some(place),
            ..Default::default()
        }
    }

    #[test]
    fn test_ranking_ordered_by_win_probability() {
        let bundle = bundle_with_horses(&[1, 2, 3, 4, 5]);
        let scores = vec![
            score(1, 0.05, 0.2, 0.4),
            score(2, 0.40, 0.6, 0.8),
            score(3, 0.25, 0.5, 0.7),
            score(4, 0.20, 0.4, 0.6),
            score(5, 0.10, 0.3, 0.5),
        ];
        let result = generate_ranking(&bundle, scores, "ensemble_model");

        assert_eq!(result.ranked_horses[0].horse_number, 2);
        // ranks are sequential and win probabilities non-increasing
        for (i, h) in result.ranked_horses.iter().enumerate() {
            assert_eq!(h.rank, (i + 1) as u32);
        }
        for w in result.ranked_horses.windows(2) {
            assert!(w[0].win_probability >= w[1].win_probability);
        }
        // the top horse has the maximum win probability
        let max_win = result
            .ranked_horses
            .iter()
            .map(|h| h.win_probability)
            .fold(f64::MIN, f64::max);
        assert_eq!(result.ranked_horses[0].win_probability, max_win);
    }

    #[test]
    fn test_aux_rankings_and_dark_horses() {
        let bundle = bundle_with_horses(&[1, 2, 3, 4, 5, 6]);
        let scores = vec![
            score(1, 0.30, 0.55, 0.75),
            score(2, 0.25, 0.50, 0.70),
            score(3, 0.20, 0.40, 0.60),
            score(4, 0.12, 0.30, 0.45),
            score(5, 0.08, 0.15, 0.30), // dark horse: place 0.30, win < 0.10
            score(6, 0.05, 0.10, 0.20), // dark horse: place 0.20, win < 0.10
        ];
        let result = generate_ranking(&bundle, scores, "ensemble_model");

        let quinella = result.quinella_ranking.unwrap();
        assert_eq!(quinella.len(), 5);
        for w in quinella.windows(2) {
            assert!(w[0].probability >= w[1].probability);
        }

        let dark = result.dark_horses.unwrap();
        assert_eq!(dark.len(), 2);
        assert!(dark.iter().all(|d| d.place_prob >= 0.20 && d.win_prob < 0.10));
    }

    #[test]
    fn test_legacy_place_only_still_derives_quinella() {
        // No quinella classifier: quinella comes from the residual split and
        // the auxiliary ranking is still present.
        let bundle = bundle_with_horses(&[1, 2, 3]);
        let scores = vec![
            HorseScore {
                horse_number: 1,
                win_probability: 0.5,
                place_probability: Some(0.9),
                ..Default::default()
            },
            HorseScore {
                horse_number: 2,
                win_probability: 0.3,
                place_probability: Some(0.7),
                ..Default::default()
            },
            HorseScore {
                horse_number: 3,
                win_probability: 0.2,
                place_probability: Some(0.5),
                ..Default::default()
            },
        ];
        let result = generate_ranking(&bundle, scores, "ensemble_model");
        assert!(result
            .ranked_horses
            .iter()
            .all(|h| h.quinella_probability.is_some()));
        let quinella = result.quinella_ranking.unwrap();
        assert_eq!(quinella.len(), 3);
        for w in quinella.windows(2) {
            assert!(w[0].probability >= w[1].probability);
        }
    }

    #[test]
    fn test_regressor_only_omits_quinella_and_place() {
        // Softmax-fallback scores: no classifier heads, so quinella/place
        // and the auxiliary rankings are skipped entirely.
        let bundle = bundle_with_horses(&[1, 2, 3]);
        let scores = vec![
            HorseScore {
                horse_number: 1,
                win_probability: 0.5,
                ..Default::default()
            },
            HorseScore {
                horse_number: 2,
                win_probability: 0.3,
                ..Default::default()
            },
            HorseScore {
                horse_number: 3,
                win_probability: 0.2,
                ..Default::default()
            },
        ];
        let result = generate_ranking(&bundle, scores, "ensemble_model");
        for h in &result.ranked_horses {
            assert!(h.quinella_probability.is_none());
            assert!(h.place_probability.is_none());
            assert!(h.position_distribution.second.is_none());
            assert!(h.position_distribution.third.is_none());
        }
        assert!(result.quinella_ranking.is_none());
        assert!(result.place_ranking.is_none());
        assert!(result.dark_horses.is_none());
    }

    #[test]
    fn test_scratched_horse_never_ranked() {
        // Scores are built only from valid starters; a bundle entry with
        // horse number 0 has no score and never appears.
        let mut bundle = bundle_with_horses(&[1, 2]);
        bundle.horses.push(EntryInfo {
            umaban: "00".to_string(),
            bamei: "Scratched".to_string(),
            ..Default::default()
        });
        let scores = vec![score(1, 0.6, 0.8, 0.9), score(2, 0.4, 0.7, 0.8)];
        let result = generate_ranking(&bundle, scores, "ensemble_model");
        assert_eq!(result.ranked_horses.len(), 2);
        assert!(result.ranked_horses.iter().all(|h| h.horse_number != 0));
    }

    #[test]
    fn test_mock_prediction_shape() {
        let response = mock_prediction("2025012506010911", false);
        let horses = &response.prediction_result.ranked_horses;
        assert!(horses.len() >= 5);
        for (i, h) in horses.iter().enumerate() {
            assert_eq!(h.rank, (i + 1) as u32);
            assert!(h.win_probability >= 0.0 && h.win_probability <= 1.0);
        }
        let sum: f64 = horses.iter().map(|h| h.win_probability).sum();
        assert!((sum - 1.0).abs() <= 0.1);
    }

    #[test]
    fn test_race_name_fallback() {
        let mut race = RaceInfo::default();
        race.kyoso_joken_code = "703".to_string();
        race.kyoso_shubetsu_code = "12".to_string();
        assert_eq!(resolve_race_name(&race), "3yo maiden");

        race.kyoso_mei = "Japan Cup".to_string();
        assert_eq!(resolve_race_name(&race), "Japan Cup");
    }
}
