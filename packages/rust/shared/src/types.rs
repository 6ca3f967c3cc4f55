//! Core domain types for HR document metadata.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Owner tag written into every record's `SourceSystemOwner` field.
pub const SOURCE_SYSTEM_OWNER: &str = "PEOPLE";

/// Directory holding the original documents inside a package.
pub const BLOB_DIR: &str = "BlobFiles";

/// Extraction snapshot file name inside a package.
pub const METADATA_FILE: &str = "metadata.json";

/// Checksum manifest file name inside a package.
pub const MANIFEST_FILE: &str = "manifest.json";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Identifier of one batch run; the uploaded package lives under `<run_id>/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = crate::HrDocsError;

    /// Accepts any non-empty id made of ASCII alphanumerics, `-`, `_` or `.`,
    /// since it becomes a path segment in the output store.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let valid = !s.is_empty()
            && s != "."
            && s != ".."
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(crate::HrDocsError::validation(format!(
                "invalid run id {s:?}: use letters, digits, '-', '_' or '.'"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentType
// ---------------------------------------------------------------------------

/// Closed set of HR document categories ("clusters").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    ProvvedimentiAFavore,
    SupervisioneMifid,
    FlessibilitaOrarie,
    PolizzaSanitaria,
    Formazione,
    FringeBenefits,
    AssunzioneMatricola,
    PrimoImpiego,
    FondoPensione,
    DestinazioneTfr,
    NessunCluster,
    NominaTitolarita,
    AssegnazioneRuolo,
    PartTime,
    Cessazione,
    ProrogaTd,
    ProvvedimentiDisciplinari,
    Trasferimento,
    LetteraAssunzione,
    TrasformazioneTi,
    PropostaDiAssunzione,
}

impl DocumentType {
    /// All categories, in the order the classification prompt lists them.
    pub const ALL: [DocumentType; 21] = [
        Self::ProvvedimentiAFavore,
        Self::SupervisioneMifid,
        Self::FlessibilitaOrarie,
        Self::PolizzaSanitaria,
        Self::Formazione,
        Self::FringeBenefits,
        Self::AssunzioneMatricola,
        Self::PrimoImpiego,
        Self::FondoPensione,
        Self::DestinazioneTfr,
        Self::NessunCluster,
        Self::NominaTitolarita,
        Self::AssegnazioneRuolo,
        Self::PartTime,
        Self::Cessazione,
        Self::ProrogaTd,
        Self::ProvvedimentiDisciplinari,
        Self::Trasferimento,
        Self::LetteraAssunzione,
        Self::TrasformazioneTi,
        Self::PropostaDiAssunzione,
    ];

    /// The label written into the bulk file.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ProvvedimentiAFavore => "Provvedimenti a favore",
            Self::SupervisioneMifid => "Supervisione Mifid",
            Self::FlessibilitaOrarie => "Flessibilità orarie",
            Self::PolizzaSanitaria => "Polizza sanitaria",
            Self::Formazione => "Formazione",
            Self::FringeBenefits => "Fringe benefits",
            Self::AssunzioneMatricola => "Assunzione matricola",
            Self::PrimoImpiego => "Primo impiego",
            Self::FondoPensione => "Fondo pensione",
            Self::DestinazioneTfr => "Destinazione TFR",
            Self::NessunCluster => "Nessun cluster",
            Self::NominaTitolarita => "Nomina titolarità",
            Self::AssegnazioneRuolo => "Assegnazione ruolo",
            Self::PartTime => "Part-time",
            Self::Cessazione => "Cessazione",
            Self::ProrogaTd => "Proroga TD",
            Self::ProvvedimentiDisciplinari => "Provvedimenti disciplinari",
            Self::Trasferimento => "Trasferimento",
            Self::LetteraAssunzione => "Lettera assunzione",
            Self::TrasformazioneTi => "Trasformazione TI",
            Self::PropostaDiAssunzione => "Proposta di assunzione",
        }
    }

    /// Look up a category by exact or case-insensitive label.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .iter()
            .find(|t| t.label() == label)
            .or_else(|| {
                let lower = label.to_lowercase();
                Self::ALL.iter().find(|t| t.label().to_lowercase() == lower)
            })
            .copied()
    }

    /// Classify a model-provided label.
    ///
    /// Empty input means "unclassified" (`None`); any other value outside the
    /// closed set becomes [`DocumentType::NessunCluster`].
    pub fn classify(label: &str) -> Option<Self> {
        if label.trim().is_empty() {
            return None;
        }
        Some(Self::from_label(label).unwrap_or(Self::NessunCluster))
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for DocumentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for DocumentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Self::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown document type {label:?}")))
    }
}

/// Serde adapter: `Option<DocumentType>` as a label, `""` for `None`.
mod label_or_empty {
    use super::DocumentType;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DocumentType>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.map(|t| t.label()).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DocumentType>, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(DocumentType::classify(&label))
    }
}

// ---------------------------------------------------------------------------
// DocumentMetadata
// ---------------------------------------------------------------------------

/// Metadata for one ingested document. Every field is always present;
/// "unknown" is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Object key of the source file (unique within a run).
    pub filename: String,
    pub person_number: String,
    /// `None` when the document could not be classified.
    #[serde(with = "label_or_empty")]
    pub document_type: Option<DocumentType>,
    pub country: String,
    pub document_code: String,
    pub document_name: String,
    pub date_from: String,
    pub date_to: String,
    pub source_system_owner: String,
    pub source_system_id: String,
}

impl DocumentMetadata {
    /// The fallback record for a document whose extraction failed.
    pub fn unclassified(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            person_number: String::new(),
            document_type: None,
            country: String::new(),
            document_code: String::new(),
            document_name: String::new(),
            date_from: String::new(),
            date_to: String::new(),
            source_system_owner: SOURCE_SYSTEM_OWNER.to_string(),
            source_system_id: String::new(),
        }
    }

    /// The document type label, or `""` when unclassified.
    pub fn document_type_label(&self) -> &'static str {
        self.document_type.map(|t| t.label()).unwrap_or("")
    }

    /// Name of the file inside the archive (`BlobFiles/<name>`).
    pub fn archived_name(&self) -> &str {
        archived_name(&self.filename)
    }

    /// True when no extracted field carries a value.
    pub fn is_unclassified(&self) -> bool {
        self.document_type.is_none()
            && self.person_number.is_empty()
            && self.country.is_empty()
            && self.document_code.is_empty()
            && self.document_name.is_empty()
            && self.date_from.is_empty()
            && self.date_to.is_empty()
    }
}

/// Basename of an object key (`a/b/scan.pdf` → `scan.pdf`).
pub fn archived_name(key: &str) -> &str {
    key.rsplit(['/', '\\']).next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_id_rejects_path_segments() {
        assert!("1717171717".parse::<RunId>().is_ok());
        assert!("../etc".parse::<RunId>().is_err());
        assert!("a/b".parse::<RunId>().is_err());
        assert!("".parse::<RunId>().is_err());
        assert!("..".parse::<RunId>().is_err());
    }

    #[test]
    fn all_labels_are_distinct_and_roundtrip() {
        assert_eq!(DocumentType::ALL.len(), 21);
        for t in DocumentType::ALL {
            assert_eq!(DocumentType::from_label(t.label()), Some(t));
        }
        let mut labels: Vec<_> = DocumentType::ALL.iter().map(|t| t.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 21);
    }

    #[test]
    fn classify_labels() {
        assert_eq!(
            DocumentType::classify("Formazione"),
            Some(DocumentType::Formazione)
        );
        assert_eq!(
            DocumentType::classify("  flessibilità ORARIE "),
            Some(DocumentType::FlessibilitaOrarie)
        );
        assert_eq!(
            DocumentType::classify("Busta paga"),
            Some(DocumentType::NessunCluster)
        );
        assert_eq!(DocumentType::classify(""), None);
        assert_eq!(DocumentType::classify("   "), None);
    }

    #[test]
    fn unclassified_record_is_empty_except_owner() {
        let meta = DocumentMetadata::unclassified("scans/doc7.pdf");
        assert!(meta.is_unclassified());
        assert_eq!(meta.source_system_owner, "PEOPLE");
        assert_eq!(meta.source_system_id, "");
        assert_eq!(meta.document_type_label(), "");
        assert_eq!(meta.archived_name(), "doc7.pdf");
    }

    #[test]
    fn metadata_serializes_type_as_label() {
        let mut meta = DocumentMetadata::unclassified("doc1.txt");
        meta.document_type = Some(DocumentType::PartTime);

        let json = serde_json::to_string(&meta).expect("serialize");
        assert!(json.contains(r#""document_type":"Part-time""#));

        let parsed: DocumentMetadata = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, meta);

        let empty = serde_json::to_string(&DocumentMetadata::unclassified("x")).unwrap();
        assert!(empty.contains(r#""document_type":"""#));
        let parsed: DocumentMetadata = serde_json::from_str(&empty).unwrap();
        assert_eq!(parsed.document_type, None);
    }

    #[test]
    fn archived_name_strips_directories() {
        assert_eq!(archived_name("doc1.txt"), "doc1.txt");
        assert_eq!(archived_name("2024/hr/doc1.pdf"), "doc1.pdf");
        assert_eq!(archived_name(r"win\path\doc.tif"), "doc.tif");
    }
}
