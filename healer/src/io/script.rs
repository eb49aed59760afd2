//! Reading and replacing script content.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

/// Suffix of the staging file written next to a script while it is replaced.
pub const TEMP_SUFFIX: &str = ".healer.tmp";

/// Read the current script content as UTF-8 text.
pub fn read_script(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read script {}", path.display()))
}

/// Replace the script content atomically (staging file + rename).
///
/// The staging file sits next to the script and takes over its permissions, so
/// an executable script stays executable. It is removed on every failure path,
/// including a write that stops partway.
pub fn write_script(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = tempfile::Builder::new()
        .prefix(".")
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .with_context(|| format!("create staging file in {}", dir.display()))?;

    fill(&mut staged, path, contents)?;
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("replace script {}", path.display()))?;
    debug!(script = %path.display(), bytes = contents.len(), "script replaced");
    Ok(())
}

fn fill(staged: &mut NamedTempFile, path: &Path, contents: &str) -> Result<()> {
    staged
        .write_all(contents.as_bytes())
        .and_then(|()| staged.flush())
        .with_context(|| format!("write staging file {}", staged.path().display()))?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(staged.path(), meta.permissions())
            .with_context(|| format!("copy permissions to {}", staged.path().display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(TEMP_SUFFIX))
            .collect()
    }

    #[test]
    fn write_replaces_content_and_leaves_no_staging_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("tool.py");
        fs::write(&script, "old\n").expect("write");

        write_script(&script, "new\n").expect("replace");
        assert_eq!(read_script(&script).expect("read"), "new\n");
        assert!(staging_files(temp.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("tool.sh");
        fs::write(&script, "old\n").expect("write");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

        write_script(&script, "new\n").expect("replace");
        let mode = fs::metadata(&script).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn failed_replace_removes_the_staging_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A directory in place of the script makes the final rename fail after
        // the staging file has been fully written.
        let script = temp.path().join("tool.py");
        fs::create_dir(&script).expect("mkdir");
        fs::write(script.join("keep"), "x").expect("fill dir");

        let err = write_script(&script, "new\n").unwrap_err();
        assert!(format!("{err:#}").contains("replace script"));
        assert!(staging_files(temp.path()).is_empty());
        assert!(script.is_dir());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = write_script(&temp.path().join("gone").join("tool.py"), "x\n").unwrap_err();
        assert!(format!("{err:#}").contains("create staging file"));
    }

    #[test]
    fn read_missing_script_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read_script(&temp.path().join("nope.py")).unwrap_err();
        assert!(err.to_string().contains("read script"));
    }
}
