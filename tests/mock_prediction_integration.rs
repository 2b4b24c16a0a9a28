//! End-to-end facade test in mock mode (`DB_MODE=mock` equivalent): no
//! store, deterministic output, full response shape.

use std::sync::Arc;

use keiba_engine::models::{Config, DbMode};
use keiba_engine::predict::PredictionService;
use keiba_engine::ModelManager;

fn mock_config() -> Config {
    Config {
        db_host: "localhost".to_string(),
        db_port: 5432,
        db_name: "keiba".to_string(),
        db_user: "postgres".to_string(),
        db_password: String::new(),
        db_pool_min_size: 1,
        db_pool_max_size: 2,
        db_mode: DbMode::Mock,
        port: 0,
        model_dir: "models".into(),
        bias_date: None,
        retrain_enabled: false,
    }
}

#[tokio::test]
async fn mock_mode_prediction_shape() {
    let service = PredictionService::new(
        None,
        mock_config(),
        Arc::new(ModelManager::new("models")),
    );

    let response = service
        .generate_prediction("2025012506010911", false, None)
        .await
        .expect("mock prediction should always succeed");

    assert_eq!(response.race_id, "2025012506010911");
    assert!(!response.is_final);
    assert!(!response.prediction_id.is_empty());

    let horses = &response.prediction_result.ranked_horses;
    assert!(horses.len() >= 5, "expected at least 5 ranked horses");

    for (i, horse) in horses.iter().enumerate() {
        assert_eq!(horse.rank, (i + 1) as u32, "ranks must be sequential");
        assert!((0.0..=1.0).contains(&horse.win_probability));
        let d = &horse.position_distribution;
        assert!(d.first >= 0.0 && d.out_of_place >= 0.0);
        assert!(d.second.unwrap_or(0.0) >= 0.0 && d.third.unwrap_or(0.0) >= 0.0);
    }

    let win_sum: f64 = horses.iter().map(|h| h.win_probability).sum();
    assert!(
        (win_sum - 1.0).abs() <= 0.1,
        "mock win probabilities should roughly sum to 1, got {}",
        win_sum
    );
}

#[tokio::test]
async fn mock_mode_is_deterministic() {
    let service = PredictionService::new(
        None,
        mock_config(),
        Arc::new(ModelManager::new("models")),
    );

    let a = service
        .generate_prediction("2025012506010911", true, None)
        .await
        .unwrap();
    let b = service
        .generate_prediction("2025012506010911", true, None)
        .await
        .unwrap();

    let nums_a: Vec<u32> = a
        .prediction_result
        .ranked_horses
        .iter()
        .map(|h| h.horse_number)
        .collect();
    let nums_b: Vec<u32> = b
        .prediction_result
        .ranked_horses
        .iter()
        .map(|h| h.horse_number)
        .collect();
    assert_eq!(nums_a, nums_b);
    assert!(a.is_final && b.is_final);
}
