use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Builds the dated CSV file name for an export job, e.g. `report_2024-03-05.csv`.
pub fn export_file_name(stem: &str, date: NaiveDate) -> String {
    format!("{}_{}.csv", stem, date.format("%Y-%m-%d"))
}

/// Same path with the extension swapped to `.zip`.
pub fn zip_path_for(csv_path: &Path) -> PathBuf {
    csv_path.with_extension("zip")
}

/// Joins the remote folder and file name with a single `/`. An empty folder
/// means the login directory; a folder of only slashes means the root.
pub fn remote_file_path(folder: &str, file_name: &str) -> String {
    let trimmed = folder.trim_end_matches('/');
    if !trimmed.is_empty() {
        format!("{}/{}", trimmed, file_name)
    } else if folder.is_empty() {
        file_name.to_string()
    } else {
        format!("/{}", file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_file_name_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(export_file_name("report", date), "report_2024-03-05.csv");
    }

    #[test]
    fn test_zip_path_replaces_extension_only() {
        let path = Path::new("/data/out/sales.v2_2024-03-05.csv");
        assert_eq!(zip_path_for(path), PathBuf::from("/data/out/sales.v2_2024-03-05.zip"));
    }

    #[test]
    fn test_remote_file_path() {
        assert_eq!(remote_file_path("/upload", "a.zip"), "/upload/a.zip");
        assert_eq!(remote_file_path("/upload/", "a.zip"), "/upload/a.zip");
        assert_eq!(remote_file_path("", "a.zip"), "a.zip");
        assert_eq!(remote_file_path("outbox", "a.zip"), "outbox/a.zip");
    }

    #[test]
    fn test_remote_file_path_at_root() {
        assert_eq!(remote_file_path("/", "a.zip"), "/a.zip");
        assert_eq!(remote_file_path("//", "a.zip"), "/a.zip");
    }
}
