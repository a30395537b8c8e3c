use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

/// One row of the knowledge-items CSV export.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(default)]
    ki_topic: String,
    #[serde(default)]
    ki_text: String,
    #[serde(default)]
    alt_ki_text: String,
    #[serde(default)]
    bad_ki_text: String,
}

/// A cleaned knowledge item ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeDocument {
    pub doc_id: String,
    pub topic: String,
    pub text: String,
    /// Text actually embedded: topic and text plus the alternate and
    /// known-bad phrasings, so paraphrased queries still land on the entry.
    pub embed_text: String,
}

/// Loads and cleans the knowledge CSV: rows without a topic or text are
/// dropped, and rows whose combined text repeats are dropped (first wins).
/// Document ids are assigned positionally.
pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<KnowledgeDocument>> {
    info!(path = %path.as_ref().display(), "Loading knowledge CSV");

    let mut reader = ::csv::Reader::from_path(path.as_ref())?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut documents = Vec::new();

    for record in reader.deserialize() {
        let record: CsvRecord = record?;
        let topic = record.ki_topic.trim();
        let text = record.ki_text.trim();

        if topic.is_empty() || text.is_empty() {
            debug!("Skipping record with missing topic or text");
            continue;
        }

        let embed_text = format!(
            "{}. {} ALT: {} BAD: {}",
            topic,
            text,
            record.alt_ki_text.trim(),
            record.bad_ki_text.trim()
        );

        if !seen.insert(embed_text.clone()) {
            debug!(topic = topic, "Skipping duplicate record");
            continue;
        }

        documents.push(KnowledgeDocument {
            doc_id: format!("ki-{:04}", documents.len()),
            topic: topic.to_string(),
            text: text.to_string(),
            embed_text,
        });
    }

    info!(count = documents.len(), "Knowledge CSV loaded");
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_and_combines_fields() {
        let file = write_csv(
            "ki_topic,ki_text,alt_ki_text,bad_ki_text\n\
             VPN Setup,Install the VPN client.,Set up the VPN.,VPN is magic.\n",
        );

        let docs = load(file.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "ki-0000");
        assert_eq!(docs[0].topic, "VPN Setup");
        assert_eq!(docs[0].text, "Install the VPN client.");
        assert_eq!(
            docs[0].embed_text,
            "VPN Setup. Install the VPN client. ALT: Set up the VPN. BAD: VPN is magic."
        );
    }

    #[test]
    fn drops_rows_missing_required_fields() {
        let file = write_csv(
            "ki_topic,ki_text,alt_ki_text,bad_ki_text\n\
             ,Install the VPN client.,,\n\
             Password Reset,,,\n\
             Password Reset,Use the self-service portal.,,\n",
        );

        let docs = load(file.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].topic, "Password Reset");
    }

    #[test]
    fn missing_optional_columns_become_empty() {
        let file = write_csv(
            "ki_topic,ki_text\n\
             Backups,Nightly backups run at 2am.\n",
        );

        let docs = load(file.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(
            docs[0].embed_text,
            "Backups. Nightly backups run at 2am. ALT:  BAD: "
        );
    }

    #[test]
    fn dedupes_on_combined_text() {
        let file = write_csv(
            "ki_topic,ki_text,alt_ki_text,bad_ki_text\n\
             VPN Setup,Install the VPN client.,,\n\
             VPN Setup,Install the VPN client.,,\n\
             VPN Setup,Install the VPN client.,Different alt.,\n",
        );

        let docs = load(file.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, "ki-0000");
        assert_eq!(docs[1].doc_id, "ki-0001");
    }

    #[test]
    fn fields_are_trimmed() {
        let file = write_csv(
            "ki_topic,ki_text,alt_ki_text,bad_ki_text\n\
             \"  VPN Setup \",\" Install the VPN client. \",\" alt \",\" bad \"\n",
        );

        let docs = load(file.path()).unwrap();
        assert_eq!(docs[0].topic, "VPN Setup");
        assert_eq!(
            docs[0].embed_text,
            "VPN Setup. Install the VPN client. ALT: alt BAD: bad"
        );
    }
}
