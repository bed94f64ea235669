//! Accepted upload content types and their storage extensions.

use std::fmt;
use std::path::Path;

use mime_guess::mime::Mime;

use crate::error::JobError;

/// Content types accepted for input uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    ApplicationXml,
    TextXml,
    AtomXml,
    SbmlXml,
    ApplicationJson,
    TextJson,
    TextPlain,
}

impl MediaType {
    pub const ALL: [MediaType; 7] = [
        MediaType::ApplicationXml,
        MediaType::TextXml,
        MediaType::AtomXml,
        MediaType::SbmlXml,
        MediaType::ApplicationJson,
        MediaType::TextJson,
        MediaType::TextPlain,
    ];

    /// Parses a declared `Content-Type`, ignoring parameters such as
    /// `charset`. Anything outside the accepted set is rejected.
    pub fn parse(declared: &str) -> Result<Self, JobError> {
        let unsupported = || JobError::UnsupportedMediaType(declared.to_string());
        let mime: Mime = declared.trim().parse().map_err(|_| unsupported())?;

        Self::ALL
            .into_iter()
            .find(|m| m.essence().eq_ignore_ascii_case(mime.essence_str()))
            .ok_or_else(unsupported)
    }

    pub fn essence(&self) -> &'static str {
        match self {
            MediaType::ApplicationXml => "application/xml",
            MediaType::TextXml => "text/xml",
            MediaType::AtomXml => "application/atom+xml",
            MediaType::SbmlXml => "application/sbml+xml",
            MediaType::ApplicationJson => "application/json",
            MediaType::TextJson => "text/json",
            MediaType::TextPlain => "text/plain",
        }
    }

    /// Extension used for the stored slot file.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::ApplicationXml
            | MediaType::TextXml
            | MediaType::AtomXml
            | MediaType::SbmlXml => "xml",
            MediaType::ApplicationJson | MediaType::TextJson => "json",
            MediaType::TextPlain => "txt",
        }
    }

    /// Content type served back for a stored slot file.
    pub fn for_extension(ext: &str) -> Option<Self> {
        match ext {
            "xml" => Some(MediaType::ApplicationXml),
            "json" => Some(MediaType::ApplicationJson),
            "txt" => Some(MediaType::TextPlain),
            _ => None,
        }
    }

    /// Best guess for a local file, used by the CLI before uploading.
    pub fn guess_for_path(path: &Path) -> Option<Self> {
        mime_guess::from_path(path)
            .iter()
            .find_map(|m| Self::parse(m.essence_str()).ok())
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.essence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepted_types() {
        assert_eq!(MediaType::parse("application/xml").unwrap(), MediaType::ApplicationXml);
        assert_eq!(MediaType::parse("text/json").unwrap(), MediaType::TextJson);
        assert_eq!(
            MediaType::parse("application/json; charset=utf-8").unwrap(),
            MediaType::ApplicationJson
        );
        assert_eq!(MediaType::parse("TEXT/XML").unwrap(), MediaType::TextXml);
    }

    #[test]
    fn test_parse_rejects_unknown_and_garbage() {
        for declared in ["image/png", "application/pdf", "", "not a mime"] {
            assert!(matches!(
                MediaType::parse(declared),
                Err(JobError::UnsupportedMediaType(_))
            ));
        }
    }

    #[test]
    fn test_every_accepted_type_maps_back() {
        for media in MediaType::ALL {
            let ext = media.extension();
            let served = MediaType::for_extension(ext).unwrap();
            assert_eq!(served.extension(), ext);
        }
    }

    #[test]
    fn test_guess_for_path() {
        assert_eq!(
            MediaType::guess_for_path(Path::new("model.json")),
            Some(MediaType::ApplicationJson)
        );
        assert!(MediaType::guess_for_path(Path::new("model.xml")).is_some());
        assert_eq!(MediaType::guess_for_path(Path::new("photo.png")), None);
    }
}
