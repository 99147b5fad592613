//! Calibration file – reads/writes `~/.tethys/calibration.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use tethys_types::{Calibration, TethysError};

/// Return the calibration path: `$TETHYS_CONFIG` when set, otherwise
/// `~/.tethys/calibration.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("TETHYS_CONFIG")
        && !p.trim().is_empty()
    {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tethys").join("calibration.toml")
}

/// Outcome of [`load_or_init`].
#[derive(Debug)]
pub struct Loaded {
    pub calibration: Calibration,
    /// `true` when the file did not exist and the defaults were written.
    pub created: bool,
}

/// Load the calibration at `path`, writing the defaults there first if the
/// file is missing.  Environment overrides are applied and the result is
/// validated before it is returned.
pub fn load_or_init(path: &Path) -> Result<Loaded, TethysError> {
    let created = !path.exists();
    let mut calibration = if created {
        let cal = Calibration::default();
        save_to(&cal, path)?;
        cal
    } else {
        load_from(path)?
    };
    apply_env_overrides(&mut calibration, |key| std::env::var(key).ok())?;
    calibration.validate()?;
    Ok(Loaded {
        calibration,
        created,
    })
}

pub(crate) fn load_from(path: &Path) -> Result<Calibration, TethysError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        TethysError::Configuration(format!("failed to read {}: {e}", path.display()))
    })?;
    toml::from_str(&raw).map_err(|e| {
        TethysError::Configuration(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Apply `TETHYS_*` timing overrides.
///
/// | Variable | Calibration field |
/// |---|---|
/// | `TETHYS_COMMAND_TIMEOUT_MS` | `timing.command_timeout_ms` |
/// | `TETHYS_CONTROL_HZ` | `timing.control_hz` |
/// | `TETHYS_ACTUATOR_HZ` | `timing.actuator_hz` |
/// | `TETHYS_RAMP_STEP` | `timing.ramp_step` |
///
/// An override that does not parse is a configuration error rather than
/// silently ignored; these values gate the safety layer.
pub fn apply_env_overrides(
    cal: &mut Calibration,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), TethysError> {
    if let Some(v) = parse_override(&lookup, "TETHYS_COMMAND_TIMEOUT_MS")? {
        cal.timing.command_timeout_ms = v;
    }
    if let Some(v) = parse_override(&lookup, "TETHYS_CONTROL_HZ")? {
        cal.timing.control_hz = v;
    }
    if let Some(v) = parse_override(&lookup, "TETHYS_ACTUATOR_HZ")? {
        cal.timing.actuator_hz = v;
    }
    if let Some(v) = parse_override(&lookup, "TETHYS_RAMP_STEP")? {
        cal.timing.ramp_step = v;
    }
    Ok(())
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, TethysError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TethysError::Configuration(format!("{key}: cannot parse {raw:?}"))),
    }
}

/// Save the calibration, creating the parent directory if necessary.
pub fn save_to(cal: &Calibration, path: &Path) -> Result<(), TethysError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            TethysError::Configuration(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    let raw = toml::to_string_pretty(cal)
        .map_err(|e| TethysError::Configuration(format!("failed to serialize calibration: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        TethysError::Configuration(format!("failed to write {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn config_path_points_to_tethys_dir() {
        let p = config_path_for_home("/home/pilot");
        assert!(p.to_string_lossy().contains(".tethys"));
        assert!(p.to_string_lossy().ends_with("calibration.toml"));
    }

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let loaded = load_or_init(&path).expect("defaults are valid");
        assert!(loaded.created);
        assert!(path.exists());

        let again = load_or_init(&path).expect("reload");
        assert!(!again.created);
        assert_eq!(again.calibration.thrusters.len(), 8);
    }

    #[test]
    fn roundtrip_preserves_edits() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("cal.toml");

        let mut cal = Calibration::default();
        cal.thrusters[2].working = false;
        cal.thrusters[5].inverted = true;
        cal.pid.yaw.enabled = true;
        cal.timing.ramp_step = 12;
        save_to(&cal, &path).expect("save");

        assert_eq!(load_from(&path).expect("load"), cal);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("cal.toml");
        fs::write(&path, "force_limit = 0.8\n[timing]\ncontrol_hz = 20.0\n").unwrap();

        let cal = load_from(&path).expect("load");
        assert_eq!(cal.force_limit, 0.8);
        assert_eq!(cal.timing.control_hz, 20.0);
        assert_eq!(cal.timing.ramp_step, Calibration::default().timing.ramp_step);
        assert_eq!(cal.thrusters, Calibration::default().thrusters);
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("cal.toml");
        fs::write(&path, "force_limit = \"lots\"").unwrap();
        assert!(matches!(load_from(&path), Err(TethysError::Configuration(_))));
    }

    #[test]
    fn invalid_calibration_aborts_load() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("cal.toml");
        let mut cal = Calibration::default();
        cal.thrusters.pop();
        save_to(&cal, &path).expect("save");
        assert!(matches!(load_or_init(&path), Err(TethysError::Configuration(_))));
    }

    #[test]
    fn env_overrides_timing() {
        let mut cal = Calibration::default();
        apply_env_overrides(&mut cal, |key| match key {
            "TETHYS_COMMAND_TIMEOUT_MS" => Some("250".into()),
            "TETHYS_RAMP_STEP" => Some(" 25 ".into()),
            _ => None,
        })
        .expect("overrides parse");
        assert_eq!(cal.timing.command_timeout_ms, 250);
        assert_eq!(cal.timing.ramp_step, 25);
        assert_eq!(cal.timing.control_hz, Calibration::default().timing.control_hz);
    }

    #[test]
    fn unparsable_override_is_rejected() {
        let mut cal = Calibration::default();
        let err = apply_env_overrides(&mut cal, |key| {
            (key == "TETHYS_CONTROL_HZ").then(|| "fast".to_string())
        });
        assert!(matches!(err, Err(TethysError::Configuration(_))));
        assert!(apply_env_overrides(&mut cal, no_env).is_ok());
    }
}
