use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::domain::error::{AppError, Result};
use crate::domain::project::Project;
use crate::infrastructure::artifact_store::atomic_write_bytes;

/// Download one dataset file and land it atomically.
async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::HttpError(format!("Failed to fetch {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::HttpError(format!(
            "Fetch of {url} returned {}",
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::HttpError(format!("Failed to read body of {url}: {e}")))?;

    atomic_write_bytes(dest, &bytes)?;
    info!(url, dest = %dest.display(), bytes = bytes.len(), "Downloaded dataset file");
    Ok(())
}

/// Fetch projects.csv and tags.csv into the data dir. Overwrites any
/// previous copy.
pub async fn download_datasets(
    projects_url: &str,
    tags_url: &str,
    projects_dest: &Path,
    tags_dest: &Path,
) -> Result<()> {
    let client = reqwest::Client::new();
    download_file(&client, projects_url, projects_dest).await?;
    download_file(&client, tags_url, tags_dest).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProjectRecord {
    id: i64,
    created_on: String,
    title: String,
    description: String,
    tag: String,
}

#[derive(Debug, Deserialize)]
struct TagRecord {
    tag: String,
}

pub fn load_projects(path: &Path) -> Result<Vec<Project>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| AppError::ParseError(format!("Failed to open {}: {e}", path.display())))?;

    let mut projects = Vec::new();
    for record in reader.deserialize::<ProjectRecord>() {
        let record = record
            .map_err(|e| AppError::ParseError(format!("Bad row in {}: {e}", path.display())))?;
        projects.push(Project {
            id: record.id,
            created_on: record.created_on,
            title: record.title,
            description: record.description,
            tag: record.tag,
        });
    }

    if projects.is_empty() {
        return Err(AppError::ValidationError(format!(
            "No projects in {}",
            path.display()
        )));
    }
    Ok(projects)
}

pub fn load_accepted_tags(path: &Path) -> Result<HashSet<String>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| AppError::ParseError(format!("Failed to open {}: {e}", path.display())))?;

    let mut tags = HashSet::new();
    for record in reader.deserialize::<TagRecord>() {
        let record = record
            .map_err(|e| AppError::ParseError(format!("Bad row in {}: {e}", path.display())))?;
        tags.insert(record.tag);
    }

    if tags.is_empty() {
        return Err(AppError::ValidationError(format!(
            "No accepted tags in {}",
            path.display()
        )));
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_projects_parses_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.csv");
        fs::write(
            &path,
            "id,created_on,title,description,tag\n\
             1,2020-02-17,Attention is all you need,Transformer paper,natural-language-processing\n\
             2,2020-02-18,YOLO v4,Object detection,computer-vision\n",
        )
        .unwrap();

        let projects = load_projects(&path).unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].tag, "natural-language-processing");
        assert!(projects[1].text().contains("YOLO"));
    }

    #[test]
    fn test_load_accepted_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.csv");
        fs::write(&path, "tag\ncomputer-vision\nmlops\n").unwrap();

        let tags = load_accepted_tags(&path).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("mlops"));
    }

    #[test]
    fn test_empty_projects_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.csv");
        fs::write(&path, "id,created_on,title,description,tag\n").unwrap();
        assert!(load_projects(&path).is_err());
    }
}
