//! Host-side asset preparation shared by every spawned cube.
//!
//! Binaries are copied (not linked) into the directory the guest mounts,
//! because symlinks pointing outside that directory do not resolve inside
//! the VM. The disk image ships gzip-compressed and is inflated on first use.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::config::{BinariesConfig, SimConfig};
use crate::error::{Result, SimError};

/// Stage everything a cube needs before its first start.
pub fn stage_assets(config: &SimConfig) -> Result<()> {
    stage_binaries(&config.binaries)?;
    if let Some(disk_image) = &config.qemu.disk_image {
        extract_disk_image(disk_image)?;
    }
    Ok(())
}

/// Copy the start list, starter script and config package into
/// `host_bin_dir`, resolving symlinks. Returns the number of entries copied.
pub fn stage_binaries(binaries: &BinariesConfig) -> Result<usize> {
    let Some(bin_dir) = &binaries.host_bin_dir else {
        debug!("no host_bin_dir configured; skipping binary staging");
        return Ok(0);
    };

    if !bin_dir.is_dir() {
        debug!(dir = %bin_dir.display(), "creating cube binary directory");
        fs::create_dir_all(bin_dir).map_err(|source| staging_error(bin_dir, source))?;
    }

    let sources = binaries
        .start_list
        .iter()
        .chain(binaries.starter_script.iter())
        .chain(binaries.config_package.iter());

    let mut copied = 0usize;
    for source in sources {
        let real = fs::canonicalize(source).map_err(|err| staging_error(source, err))?;
        let Some(name) = real.file_name() else {
            return Err(staging_error(
                source,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            ));
        };
        let dest = bin_dir.join(name);

        remove_existing(&dest)?;
        debug!(from = %real.display(), to = %dest.display(), "copying");
        if real.is_dir() {
            copy_dir_recursive(&real, &dest)?;
        } else {
            fs::copy(&real, &dest).map_err(|err| staging_error(&dest, err))?;
        }
        copied += 1;
    }

    info!(count = copied, dir = %bin_dir.display(), "staged cube binaries");
    Ok(copied)
}

/// Inflate `<disk_image>.gz` into `disk_image` unless the image exists.
///
/// Returns `true` when an image was extracted.
pub fn extract_disk_image(disk_image: &Path) -> Result<bool> {
    if disk_image.exists() {
        debug!(image = %disk_image.display(), "disk image present");
        return Ok(false);
    }

    let compressed = gz_path(disk_image);
    info!(from = %compressed.display(), "extracting disk image");

    let input = File::open(&compressed).map_err(|err| staging_error(&compressed, err))?;
    let mut decoder = GzDecoder::new(BufReader::new(input));

    let output = File::create(disk_image).map_err(|err| staging_error(disk_image, err))?;
    let mut writer = BufWriter::new(output);

    let result = io::copy(&mut decoder, &mut writer).and_then(|_| writer.flush());
    if let Err(err) = result {
        // A half-written image would be mistaken for a complete one next time.
        let _ = fs::remove_file(disk_image);
        return Err(staging_error(&compressed, err));
    }
    Ok(true)
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

fn remove_existing(dest: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(dest) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(staging_error(dest, err)),
    };

    let removed = if meta.is_dir() {
        fs::remove_dir_all(dest)
    } else {
        fs::remove_file(dest)
    };
    removed.map_err(|err| staging_error(dest, err))
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|err| staging_error(dest, err))?;
    let entries = fs::read_dir(src).map_err(|err| staging_error(src, err))?;

    for entry in entries {
        let entry = entry.map_err(|err| staging_error(src, err))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|err| staging_error(&from, err))?;

        if file_type.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else if file_type.is_symlink() {
            let target = fs::canonicalize(&from).map_err(|err| staging_error(&from, err))?;
            if target.is_dir() {
                copy_dir_recursive(&target, &to)?;
            } else {
                fs::copy(&target, &to).map_err(|err| staging_error(&to, err))?;
            }
        } else {
            fs::copy(&from, &to).map_err(|err| staging_error(&to, err))?;
        }
    }
    Ok(())
}

fn staging_error(path: &Path, source: io::Error) -> SimError {
    SimError::Staging {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    fn write_gz(path: &Path, contents: &[u8]) {
        let file = File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::fast());
        encoder.write_all(contents).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn extracts_missing_disk_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        write_gz(&gz_path(&image), b"cube disk contents");

        assert!(extract_disk_image(&image).unwrap());
        assert_eq!(fs::read(&image).unwrap(), b"cube disk contents");

        // Present now; left alone.
        fs::write(&image, b"modified").unwrap();
        assert!(!extract_disk_image(&image).unwrap());
        assert_eq!(fs::read(&image).unwrap(), b"modified");
    }

    #[test]
    fn missing_archive_is_staging_error() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");

        let err = extract_disk_image(&image).unwrap_err();
        assert!(matches!(err, SimError::Staging { path, .. } if path == gz_path(&image)));
        assert!(!image.exists());
    }

    #[test]
    fn corrupt_archive_leaves_no_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        fs::write(gz_path(&image), b"not gzip at all").unwrap();

        assert!(extract_disk_image(&image).is_err());
        assert!(!image.exists());
    }

    #[test]
    fn stages_files_dirs_and_symlink_targets() {
        let src = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        let bin_dir = bin_dir.path().join("bin");

        let app = src.path().join("cube_app");
        fs::write(&app, b"\x7fELF").unwrap();

        let linked = src.path().join("linked_app");
        std::os::unix::fs::symlink(&app, &linked).unwrap();

        let starter = src.path().join("starter.py");
        fs::write(&starter, b"print('start')").unwrap();

        let package = src.path().join("config");
        fs::create_dir_all(package.join("nested")).unwrap();
        fs::write(package.join("cube.yaml"), b"a: 1").unwrap();
        fs::write(package.join("nested").join("extra.yaml"), b"b: 2").unwrap();

        let binaries = BinariesConfig {
            host_bin_dir: Some(bin_dir.clone()),
            start_list: vec![linked],
            starter_script: Some(starter),
            config_package: Some(package),
        };

        assert_eq!(stage_binaries(&binaries).unwrap(), 3);

        // The symlink resolves to the real file name.
        assert_eq!(fs::read(bin_dir.join("cube_app")).unwrap(), b"\x7fELF");
        assert!(!bin_dir.join("linked_app").exists());
        assert!(bin_dir.join("starter.py").is_file());

        let mut nested = String::new();
        File::open(bin_dir.join("config").join("nested").join("extra.yaml"))
            .unwrap()
            .read_to_string(&mut nested)
            .unwrap();
        assert_eq!(nested, "b: 2");
    }

    #[test]
    fn restaging_replaces_existing_entries() {
        let src = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();

        let package = src.path().join("config");
        fs::create_dir_all(&package).unwrap();
        fs::write(package.join("new.yaml"), b"new").unwrap();

        let stale = bin_dir.path().join("config");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.yaml"), b"old").unwrap();

        let binaries = BinariesConfig {
            host_bin_dir: Some(bin_dir.path().to_path_buf()),
            config_package: Some(package),
            ..BinariesConfig::default()
        };
        stage_binaries(&binaries).unwrap();

        assert!(stale.join("new.yaml").is_file());
        assert!(!stale.join("old.yaml").exists());
    }

    #[test]
    fn unset_bin_dir_skips_staging() {
        let binaries = BinariesConfig {
            start_list: vec![PathBuf::from("/nonexistent/app")],
            ..BinariesConfig::default()
        };
        assert_eq!(stage_binaries(&binaries).unwrap(), 0);
    }

    #[test]
    fn missing_source_is_staging_error() {
        let bin_dir = tempfile::tempdir().unwrap();
        let binaries = BinariesConfig {
            host_bin_dir: Some(bin_dir.path().to_path_buf()),
            start_list: vec![PathBuf::from("/nonexistent/app")],
            ..BinariesConfig::default()
        };
        let err = stage_binaries(&binaries).unwrap_err();
        assert!(matches!(err, SimError::Staging { .. }));
    }
}
