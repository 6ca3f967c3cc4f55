//! Record builder: document metadata → DocumentsOfRecord / DocumentAttachment lines.
//!
//! Pure transformation. Every input record yields exactly one line in each
//! section, in input order, with a fixed positional field count.

mod escape;

use tracing::{debug, instrument};

use hrdocs_shared::{DocumentMetadata, MappingConfig};

pub use escape::{DELIMITER, escape_field, join_fields, split_fields};

/// Section name of the metadata records.
pub const DOCUMENTS_OF_RECORD: &str = "DocumentsOfRecord";

/// Section name of the file attachment records.
pub const DOCUMENT_ATTACHMENT: &str = "DocumentAttachment";

/// Keyword that opens a header line in the bulk file.
pub const HEADER_KEYWORD: &str = "METADATA";

/// DocumentsOfRecord field names, in line order.
pub const DOR_FIELDS: [&str; 9] = [
    "PersonNumber",
    "DocumentType",
    "Country",
    "DocumentCode",
    "DocumentName",
    "DateFrom",
    "DateTo",
    "SourceSystemOwner",
    "SourceSystemId",
];

/// DocumentAttachment field names, in line order.
pub const DA_FIELDS: [&str; 10] = [
    "PersonNumber",
    "DocumentType",
    "Country",
    "DocumentCode",
    "DataTypeCode",
    "URLorTextorFileName",
    "Title",
    "File",
    "SourceSystemOwner",
    "SourceSystemId",
];

/// Default `DataTypeCode` for attachment records.
pub const DEFAULT_DATA_TYPE_CODE: &str = "FILE";

/// Options for [`build_records`].
#[derive(Debug, Clone)]
pub struct RecordOptions {
    /// Constant tag for the `DataTypeCode` field.
    pub data_type_code: String,
    /// Prefix every line with `MERGE|<Section>|`.
    pub merge_prefix: bool,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            data_type_code: DEFAULT_DATA_TYPE_CODE.to_string(),
            merge_prefix: false,
        }
    }
}

impl From<&MappingConfig> for RecordOptions {
    fn from(mapping: &MappingConfig) -> Self {
        Self {
            data_type_code: mapping.data_type_code.clone(),
            merge_prefix: mapping.merge_prefix,
        }
    }
}

impl RecordOptions {
    /// Fields per DocumentsOfRecord line under these options.
    pub fn dor_field_count(&self) -> usize {
        DOR_FIELDS.len() + self.prefix_len()
    }

    /// Fields per DocumentAttachment line under these options.
    pub fn da_field_count(&self) -> usize {
        DA_FIELDS.len() + self.prefix_len()
    }

    fn prefix_len(&self) -> usize {
        if self.merge_prefix { 2 } else { 0 }
    }
}

/// The two ordered record sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltRecords {
    pub dor_lines: Vec<String>,
    pub da_lines: Vec<String>,
}

/// Build both record sections from an ordered metadata list.
#[instrument(skip_all, fields(documents = metadata.len()))]
pub fn build_records(metadata: &[DocumentMetadata], options: &RecordOptions) -> BuiltRecords {
    let mut records = BuiltRecords {
        dor_lines: Vec::with_capacity(metadata.len()),
        da_lines: Vec::with_capacity(metadata.len()),
    };

    for meta in metadata {
        records.dor_lines.push(documents_of_record_line(meta, options));
        records.da_lines.push(document_attachment_line(meta, options));
    }

    debug!(
        dor = records.dor_lines.len(),
        da = records.da_lines.len(),
        "records built"
    );
    records
}

/// One DocumentsOfRecord line.
pub fn documents_of_record_line(meta: &DocumentMetadata, options: &RecordOptions) -> String {
    let values: [&str; 9] = [
        &meta.person_number,
        meta.document_type_label(),
        &meta.country,
        &meta.document_code,
        &meta.document_name,
        &meta.date_from,
        &meta.date_to,
        &meta.source_system_owner,
        &meta.source_system_id,
    ];
    with_prefix(DOCUMENTS_OF_RECORD, join_fields(&values), options)
}

/// One DocumentAttachment line; the file reference is the archived name.
pub fn document_attachment_line(meta: &DocumentMetadata, options: &RecordOptions) -> String {
    let file = meta.archived_name();
    let title = if meta.document_name.is_empty() {
        file
    } else {
        meta.document_name.as_str()
    };
    let values: [&str; 10] = [
        &meta.person_number,
        meta.document_type_label(),
        &meta.country,
        &meta.document_code,
        &options.data_type_code,
        file,
        title,
        file,
        &meta.source_system_owner,
        &meta.source_system_id,
    ];
    with_prefix(DOCUMENT_ATTACHMENT, join_fields(&values), options)
}

fn with_prefix(section: &str, line: String, options: &RecordOptions) -> String {
    if options.merge_prefix {
        format!("MERGE|{section}|{line}")
    } else if starts_with_header_keyword(&line) {
        // `\M` unescapes to `M`, so the value survives but the line no
        // longer reads as a header.
        format!("\\{line}")
    } else {
        line
    }
}

fn starts_with_header_keyword(line: &str) -> bool {
    line.strip_prefix(HEADER_KEYWORD)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(DELIMITER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrdocs_shared::DocumentType;
    use proptest::prelude::*;

    fn sample() -> DocumentMetadata {
        DocumentMetadata {
            filename: "doc1.txt".into(),
            person_number: "123".into(),
            document_type: Some(DocumentType::Formazione),
            country: "IT".into(),
            document_code: "C1".into(),
            document_name: "N1".into(),
            date_from: "2023-05-12".into(),
            date_to: String::new(),
            source_system_owner: "PEOPLE".into(),
            source_system_id: "C1".into(),
        }
    }

    #[test]
    fn documents_of_record_line_matches_example() {
        let records = build_records(&[sample()], &RecordOptions::default());
        assert_eq!(
            records.dor_lines,
            vec!["123|Formazione|IT|C1|N1|2023-05-12||PEOPLE|C1".to_string()]
        );
    }

    #[test]
    fn attachment_line_references_archived_file() {
        let mut meta = sample();
        meta.filename = "2024/scans/doc1.txt".into();
        let records = build_records(&[meta], &RecordOptions::default());
        assert_eq!(
            records.da_lines,
            vec!["123|Formazione|IT|C1|FILE|doc1.txt|N1|doc1.txt|PEOPLE|C1".to_string()]
        );
    }

    #[test]
    fn attachment_title_falls_back_to_file_name() {
        let meta = DocumentMetadata::unclassified("scan.pdf");
        let line = document_attachment_line(&meta, &RecordOptions::default());
        assert_eq!(line, "||||FILE|scan.pdf|scan.pdf|scan.pdf|PEOPLE|");
    }

    #[test]
    fn unclassified_record_keeps_fixed_field_count() {
        let meta = DocumentMetadata::unclassified("x.pdf");
        let options = RecordOptions::default();
        let records = build_records(&[meta], &options);

        assert_eq!(records.dor_lines[0], "|||||||PEOPLE|");
        assert_eq!(split_fields(&records.dor_lines[0]).len(), DOR_FIELDS.len());
        assert_eq!(split_fields(&records.da_lines[0]).len(), DA_FIELDS.len());
    }

    #[test]
    fn merge_prefix_matches_header_width() {
        let options = RecordOptions {
            merge_prefix: true,
            ..RecordOptions::default()
        };
        let records = build_records(&[sample()], &options);
        assert_eq!(
            records.dor_lines[0],
            "MERGE|DocumentsOfRecord|123|Formazione|IT|C1|N1|2023-05-12||PEOPLE|C1"
        );
        assert_eq!(split_fields(&records.dor_lines[0]).len(), 11);
        assert_eq!(split_fields(&records.da_lines[0]).len(), 12);
        assert_eq!(options.dor_field_count(), 11);
        assert_eq!(options.da_field_count(), 12);
    }

    #[test]
    fn pipes_in_values_cannot_add_fields() {
        let mut meta = sample();
        meta.document_name = "Lettera | allegato\nfirmato".into();
        let records = build_records(&[meta], &RecordOptions::default());

        let fields = split_fields(&records.dor_lines[0]);
        assert_eq!(fields.len(), DOR_FIELDS.len());
        assert_eq!(fields[4], "Lettera | allegato\nfirmato");
        assert!(!records.dor_lines[0].contains('\n'));
    }

    #[test]
    fn header_keyword_as_first_value_is_escaped() {
        let mut meta = DocumentMetadata::unclassified("doc.pdf");
        meta.person_number = "METADATA".into();
        let records = build_records(&[meta], &RecordOptions::default());

        assert_eq!(records.dor_lines[0], "\\METADATA|||||||PEOPLE|");
        assert!(!records.da_lines[0].starts_with("METADATA|"));

        let fields = split_fields(&records.dor_lines[0]);
        assert_eq!(fields.len(), DOR_FIELDS.len());
        assert_eq!(fields[0], "METADATA");
        assert_eq!(split_fields(&records.da_lines[0])[0], "METADATA");
    }

    #[test]
    fn header_keyword_inside_value_is_untouched() {
        let mut meta = sample();
        meta.person_number = "METADATA-7".into();
        let line = documents_of_record_line(&meta, &RecordOptions::default());
        assert!(line.starts_with("METADATA-7|"));
    }

    #[test]
    fn empty_input_builds_nothing() {
        let records = build_records(&[], &RecordOptions::default());
        assert_eq!(records, BuiltRecords::default());
    }

    fn arb_metadata() -> impl Strategy<Value = DocumentMetadata> {
        let text = "(?s).{0,12}";
        (
            "[a-z/|]{1,10}",
            prop::collection::vec(text, 7),
            prop::option::of(prop::sample::select(DocumentType::ALL.to_vec())),
        )
            .prop_map(|(filename, v, document_type)| DocumentMetadata {
                filename,
                person_number: v[0].clone(),
                document_type,
                country: v[1].clone(),
                document_code: v[2].clone(),
                document_name: v[3].clone(),
                date_from: v[4].clone(),
                date_to: v[5].clone(),
                source_system_owner: "PEOPLE".into(),
                source_system_id: v[6].clone(),
            })
    }

    proptest! {
        #[test]
        fn one_line_per_record_with_fixed_width(
            metadata in prop::collection::vec(arb_metadata(), 0..8),
            merge_prefix in any::<bool>(),
        ) {
            let options = RecordOptions { merge_prefix, ..RecordOptions::default() };
            let records = build_records(&metadata, &options);

            prop_assert_eq!(records.dor_lines.len(), metadata.len());
            prop_assert_eq!(records.da_lines.len(), metadata.len());
            for (line, meta) in records.dor_lines.iter().zip(&metadata) {
                let fields = split_fields(line);
                prop_assert_eq!(fields.len(), options.dor_field_count());
                prop_assert_eq!(&fields[fields.len() - 1], &meta.source_system_id);
            }
            for line in &records.da_lines {
                prop_assert_eq!(split_fields(line).len(), options.da_field_count());
            }
        }
    }
}
