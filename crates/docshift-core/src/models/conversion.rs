use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::constants::FALLBACK_OUTPUT_EXTENSION;
use crate::error::AdmissionError;

/// Conversions the system knows how to schedule.
///
/// The converter that actually performs a kind is looked up at dispatch time,
/// so a kind being listed here does not imply a converter is installed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    CsvToJson,
    CsvToXlsx,
    XlsxToCsv,
    TxtToPdf,
    PdfToText,
    DocxToPdf,
    DocxToMarkdown,
}

/// Default output extension per kind.
const OUTPUT_EXTENSIONS: &[(ConversionKind, &str)] = &[
    (ConversionKind::CsvToJson, "json"),
    (ConversionKind::CsvToXlsx, "xlsx"),
    (ConversionKind::XlsxToCsv, "csv"),
    (ConversionKind::TxtToPdf, "pdf"),
    (ConversionKind::PdfToText, "txt"),
    (ConversionKind::DocxToPdf, "pdf"),
    (ConversionKind::DocxToMarkdown, "md"),
];

impl ConversionKind {
    pub const ALL: [ConversionKind; 7] = [
        ConversionKind::CsvToJson,
        ConversionKind::CsvToXlsx,
        ConversionKind::XlsxToCsv,
        ConversionKind::TxtToPdf,
        ConversionKind::PdfToText,
        ConversionKind::DocxToPdf,
        ConversionKind::DocxToMarkdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionKind::CsvToJson => "csv_to_json",
            ConversionKind::CsvToXlsx => "csv_to_xlsx",
            ConversionKind::XlsxToCsv => "xlsx_to_csv",
            ConversionKind::TxtToPdf => "txt_to_pdf",
            ConversionKind::PdfToText => "pdf_to_text",
            ConversionKind::DocxToPdf => "docx_to_pdf",
            ConversionKind::DocxToMarkdown => "docx_to_markdown",
        }
    }

    /// Extension of the artifact this kind produces, without the leading dot.
    pub fn output_extension(&self) -> &'static str {
        OUTPUT_EXTENSIONS
            .iter()
            .find(|(kind, _)| kind == self)
            .map(|(_, ext)| *ext)
            .unwrap_or(FALLBACK_OUTPUT_EXTENSION)
    }
}

impl Display for ConversionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionKind {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConversionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AdmissionError::UnsupportedConversion(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_kind_round_trips_through_name() {
        for kind in ConversionKind::ALL {
            assert_eq!(kind.to_string().parse::<ConversionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let err = "png_to_gif".parse::<ConversionKind>().unwrap_err();
        assert!(matches!(err, AdmissionError::UnsupportedConversion(ref k) if k == "png_to_gif"));
    }

    #[test]
    fn test_output_extensions() {
        assert_eq!(ConversionKind::CsvToJson.output_extension(), "json");
        assert_eq!(ConversionKind::CsvToXlsx.output_extension(), "xlsx");
        assert_eq!(ConversionKind::XlsxToCsv.output_extension(), "csv");
        assert_eq!(ConversionKind::TxtToPdf.output_extension(), "pdf");
        assert_eq!(ConversionKind::PdfToText.output_extension(), "txt");
        assert_eq!(ConversionKind::DocxToPdf.output_extension(), "pdf");
        assert_eq!(ConversionKind::DocxToMarkdown.output_extension(), "md");
    }

    #[test]
    fn test_serde_uses_snake_case_names() {
        let json = serde_json::to_string(&ConversionKind::DocxToMarkdown).unwrap();
        assert_eq!(json, "\"docx_to_markdown\"");
    }
}
