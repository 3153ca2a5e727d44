use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use deface::config::DefaceConfig;
use deface::ReplaceMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DEFACE_CONFIG",
        "DEFACE_THRESHOLD",
        "DEFACE_CONSISTENCY_THRESHOLD",
        "DEFACE_BACKEND",
        "DEFACE_MODEL_PATH",
        "DEFACE_THRESHOLDS_BY_SEC",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DefaceConfig::load(None).expect("load config");
    assert_eq!(cfg.detection.threshold, 0.2);
    assert_eq!(cfg.detection.consistency_threshold, 2);
    assert!(cfg.detection.thresholds_by_sec.is_empty());
    assert_eq!(cfg.detection.backend, "auto");
    assert_eq!(cfg.mask.mode, ReplaceMode::Blur);
    assert_eq!(cfg.mask.mask_scale, 1.3);
    assert!(cfg.mask.ellipse);
    assert_eq!(cfg.mask.mosaic_size, 20);
    assert_eq!(cfg.video.codec, "libx264");
    assert_eq!(cfg.video.fps, None);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        r#"
        [detection]
        threshold = 0.3
        consistency_threshold = 4
        backend = "stub"
        model_path = "/models/centerface.onnx"
        scale = "640x360"
        thresholds_by_sec = { "0" = 0.3, "10" = 0.45 }

        [mask]
        replacewith = "solid"
        mask_scale = 1.1
        ellipse = false
        color = [0, 255, 0]

        [video]
        codec = "libx265"
        fps = 12.5
        "#,
    );

    std::env::set_var("DEFACE_CONFIG", file.path());
    std::env::set_var("DEFACE_THRESHOLD", "0.35");
    std::env::set_var("DEFACE_THRESHOLDS_BY_SEC", "{3: 0.6}");

    let cfg = DefaceConfig::load(None).expect("load config");

    assert_eq!(cfg.detection.threshold, 0.35);
    assert_eq!(cfg.detection.consistency_threshold, 4);
    assert_eq!(cfg.detection.backend, "stub");
    assert_eq!(
        cfg.detection.model_path,
        Some(PathBuf::from("/models/centerface.onnx"))
    );
    assert_eq!(cfg.detection.inference_size, Some((640, 360)));
    assert_eq!(cfg.detection.thresholds_by_sec, vec![(3.0, 0.6)]);
    assert_eq!(cfg.mask.mode, ReplaceMode::Solid);
    assert_eq!(cfg.mask.mask_scale, 1.1);
    assert!(!cfg.mask.ellipse);
    assert_eq!(cfg.mask.color, [0, 255, 0]);
    assert_eq!(cfg.video.codec, "libx265");
    assert_eq!(cfg.video.fps, Some(12.5));

    let schedule = cfg.schedule(10.0);
    assert_eq!(schedule.threshold_for_frame(29), 0.35);
    assert_eq!(schedule.threshold_for_frame(30), 0.6);

    clear_env();
}

#[test]
fn explicit_path_wins_over_env_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let env_file = config_file("[detection]\nthreshold = 0.9\n");
    let explicit = config_file("[detection]\nthreshold = 0.1\n");
    std::env::set_var("DEFACE_CONFIG", env_file.path());

    let cfg = DefaceConfig::load(Some(explicit.path())).expect("load config");
    assert_eq!(cfg.detection.threshold, 0.1);

    clear_env();
}

#[test]
fn out_of_range_env_values_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DEFACE_CONSISTENCY_THRESHOLD", "6");
    let err = DefaceConfig::load(None).unwrap_err();
    assert!(err.to_string().contains("consistency threshold"));

    // Unvalidated layering still returns the value for later overrides.
    let cfg = DefaceConfig::layered(None).expect("layered config");
    assert_eq!(cfg.detection.consistency_threshold, 6);

    std::env::set_var("DEFACE_CONSISTENCY_THRESHOLD", "two");
    assert!(DefaceConfig::layered(None).is_err());

    clear_env();
}

#[test]
fn malformed_schedule_in_env_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DEFACE_THRESHOLDS_BY_SEC", "{3: 1.5}");
    assert!(DefaceConfig::load(None).is_err());

    std::env::set_var("DEFACE_THRESHOLDS_BY_SEC", "not a map");
    assert!(DefaceConfig::load(None).is_err());

    clear_env();
}

#[test]
fn missing_or_invalid_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.toml");
    let err = DefaceConfig::load(Some(&missing)).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    let invalid = config_file("[mask]\nreplacewith = \"sparkles\"\n");
    let err = DefaceConfig::load(Some(invalid.path())).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
}
