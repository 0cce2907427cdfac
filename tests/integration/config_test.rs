//! Integration tests for configuration loading
use anyhow::Result;
use std::path::PathBuf;

use authgate_lib::{load_config, AuthError};

fn scratch_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("authgate-{}-{}.json", name, uuid::Uuid::new_v4()))
}

#[tokio::test]
async fn test_load_config_rejects_invalid_values() -> Result<()> {
    let path = scratch_file("invalid");
    tokio::fs::write(&path, r#"{"landing_path": "home"}"#).await?;

    let err = load_config(Some(&path)).await.unwrap_err();
    tokio::fs::remove_file(&path).await?;

    assert!(
        matches!(err, AuthError::Config { ref key, .. } if key == "landing_path"),
        "{:?}",
        err
    );
    Ok(())
}
