use crate::config::app_name;
use chrono::Local;
use std::env::var_os;
use std::fs::DirBuilder;
use std::path::{Path, PathBuf};

fn home_path() -> Option<String> {
    #[cfg(not(target_os = "windows"))]
    let home = var_os("HOME").map(|home| home.to_string_lossy().to_string());

    #[cfg(target_os = "windows")]
    let home = var_os("HOMEDRIVE").and_then(|drive| {
        var_os("HOMEPATH")
            .map(|home| format!("{}{}", drive.to_string_lossy(), home.to_string_lossy()))
    });

    home
}

pub fn default_saving_path() -> PathBuf {
    if let Some(home) = home_path() {
        let path = Path::new(&home).join(app_name());
        DirBuilder::new()
            .recursive(true)
            .create(&path)
            .expect("error creating directory.");
        path
    } else {
        PathBuf::from(".")
    }
}

/// Timestamped MP4 path inside the given directory.
pub fn recording_path(dir: &Path) -> PathBuf {
    dir.join(format!(
        "capture-{}.mp4",
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    ))
}

/// Timestamped PNG path inside the given directory.
pub fn photo_path(dir: &Path) -> PathBuf {
    dir.join(format!(
        "photo-{}.png",
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_carry_extension() {
        let dir = Path::new("/tmp/out");
        assert_eq!(recording_path(dir).extension().unwrap(), "mp4");
        assert_eq!(photo_path(dir).extension().unwrap(), "png");
        assert!(recording_path(dir).starts_with(dir));
    }
}
