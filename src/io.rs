//! Lab attachments on disk, laid out as `<data_dir>/labs/<lab id>/<file name>`.
//! The bytes are opaque: nothing here looks inside them.

use std::path::{Path, PathBuf};

use tokio::fs::{create_dir_all, remove_dir_all, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::err::Error;

pub async fn prepare_io(root: &Path) -> anyhow::Result<()> {
    create_dir_all(root.join("labs")).await?;
    Ok(())
}

/// Rejects anything that could escape the lab's directory.
pub fn check_file_name(name: &str) -> Result<(), Error> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
        || name.starts_with('.');
    if bad {
        return Err(Error::invalid(format!("`{}` is not a valid attachment name", name)));
    }
    Ok(())
}

pub fn lab_dir(root: &Path, lab_id: i64) -> PathBuf {
    root.join("labs").join(lab_id.to_string())
}

pub fn attachment_path(root: &Path, lab_id: i64, name: &str) -> Result<PathBuf, Error> {
    check_file_name(name)?;
    Ok(lab_dir(root, lab_id).join(name))
}

pub async fn write_attachment(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }
    if path.exists() {
        return Err(Error::conflict("Attachment already exists"));
    }
    let mut writer = BufWriter::new(File::create(path).await?);
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_attachment(path: &Path) -> Result<Vec<u8>, Error> {
    if !path.exists() {
        return Err(Error::not_found("attachment", "Attachment does not exist"));
    }
    let mut bytes = Vec::new();
    BufReader::new(File::open(path).await?)
        .read_to_end(&mut bytes)
        .await?;
    Ok(bytes)
}

pub async fn remove_lab_files(root: &Path, lab_id: i64) -> Result<(), Error> {
    let dir = lab_dir(root, lab_id);
    if dir.exists() {
        remove_dir_all(dir).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cannot_escape_the_lab_directory() {
        for bad in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", ".hidden"] {
            assert!(check_file_name(bad).is_err(), "{:?} accepted", bad);
        }
        assert!(check_file_name("handout.pdf").is_ok());
    }

    #[tokio::test]
    async fn attachments_round_trip_and_refuse_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        prepare_io(dir.path()).await.unwrap();
        let path = attachment_path(dir.path(), 4, "notes.txt").unwrap();
        write_attachment(&path, b"step 1").await.unwrap();
        assert_eq!(read_attachment(&path).await.unwrap(), b"step 1".to_vec());
        assert!(matches!(
            write_attachment(&path, b"again").await,
            Err(Error::Conflict { .. })
        ));
        remove_lab_files(dir.path(), 4).await.unwrap();
        assert!(matches!(
            read_attachment(&path).await,
            Err(Error::NotFound { .. })
        ));
    }
}
