use image::ImageReader;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Cursor;
use std::str::FromStr;

use crate::config::FerryConfig;
use crate::models::{emit, EventSender, ManagedFile, TransferEvent, TransferEventKind};

/// Checks a validator can apply. They always run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Size,
    Dimensions,
    LandscapeOrientation,
}

impl CheckKind {
    pub const ALL: [CheckKind; 3] = [
        CheckKind::Size,
        CheckKind::Dimensions,
        CheckKind::LandscapeOrientation,
    ];
}

impl Display for CheckKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CheckKind::Size => write!(f, "size"),
            CheckKind::Dimensions => write!(f, "dimensions"),
            CheckKind::LandscapeOrientation => write!(f, "landscape_orientation"),
        }
    }
}

impl FromStr for CheckKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "size" => Ok(CheckKind::Size),
            "dimensions" => Ok(CheckKind::Dimensions),
            "landscape" | "landscape_orientation" => Ok(CheckKind::LandscapeOrientation),
            _ => Err(anyhow::anyhow!("Invalid validation check: {}", s)),
        }
    }
}

/// A pre-transfer gate.
///
/// Implementations must not mutate the file; findings go to `report` as
/// `VALIDATION_ERROR` events. Returns `false` when at least one check failed.
pub trait FileValidator: Send + Sync {
    fn validate(&self, file: &ManagedFile, report: &EventSender) -> bool;
}

/// Rule-based validator covering size, MIME allow-list, image dimensions and orientation.
#[derive(Debug, Clone)]
pub struct ManagedFileValidator {
    pub max_size_allowed: u64,
    /// Empty allows every MIME type.
    pub mime_types_allowed: Vec<String>,
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
    pub applied_checks: Vec<CheckKind>,
}

impl ManagedFileValidator {
    pub fn new(max_size_allowed: u64, mime_types_allowed: Vec<String>) -> Self {
        Self {
            max_size_allowed,
            mime_types_allowed: mime_types_allowed
                .into_iter()
                .map(|m| m.trim().to_lowercase())
                .collect(),
            min_width: None,
            min_height: None,
            applied_checks: vec![CheckKind::Size],
        }
    }

    pub fn from_config(config: &FerryConfig) -> Self {
        Self {
            min_width: config.min_image_width,
            min_height: config.min_image_height,
            applied_checks: config.validation_checks.clone(),
            ..Self::new(
                config.max_file_size_bytes,
                config.allowed_content_types.clone(),
            )
        }
    }

    pub fn with_min_dimensions(mut self, min_width: Option<u32>, min_height: Option<u32>) -> Self {
        self.min_width = min_width;
        self.min_height = min_height;
        self
    }

    pub fn with_checks(mut self, checks: impl IntoIterator<Item = CheckKind>) -> Self {
        self.applied_checks = checks.into_iter().collect();
        self
    }

    fn applies(&self, check: CheckKind) -> bool {
        self.applied_checks.contains(&check)
    }

    fn check_size(&self, file: &ManagedFile) -> Option<TransferEvent> {
        if file.size() > self.max_size_allowed {
            return Some(
                finding(file, CheckKind::Size, "file.validation.size_exceeded")
                    .with_param("size", file.size())
                    .with_param("max_size", self.max_size_allowed),
            );
        }

        let mime = file.mime_type()?;
        if !self.mime_types_allowed.is_empty()
            && !self
                .mime_types_allowed
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(mime))
        {
            return Some(
                finding(file, CheckKind::Size, "file.validation.mime_type_not_allowed")
                    .with_param("mime_type", mime)
                    .with_param("allowed", self.mime_types_allowed.clone()),
            );
        }

        None
    }

    fn check_dimensions(
        &self,
        file: &ManagedFile,
        dimensions: &Result<(u32, u32), String>,
    ) -> Option<TransferEvent> {
        let (width, height) = match dimensions {
            Ok(dims) => *dims,
            Err(error) => {
                return Some(
                    finding(file, CheckKind::Dimensions, "file.validation.image_unreadable")
                        .with_param("error", error.as_str()),
                )
            }
        };

        let too_narrow = self.min_width.is_some_and(|min| width < min);
        let too_short = self.min_height.is_some_and(|min| height < min);
        if too_narrow || too_short {
            return Some(
                finding(file, CheckKind::Dimensions, "file.validation.dimensions_too_small")
                    .with_param("width", width)
                    .with_param("height", height)
                    .with_param("min_width", self.min_width)
                    .with_param("min_height", self.min_height),
            );
        }

        None
    }

    fn check_landscape(
        &self,
        file: &ManagedFile,
        dimensions: &Result<(u32, u32), String>,
    ) -> Option<TransferEvent> {
        match dimensions {
            Ok((width, height)) if height > width => Some(
                finding(
                    file,
                    CheckKind::LandscapeOrientation,
                    "file.validation.not_landscape",
                )
                .with_param("width", *width)
                .with_param("height", *height),
            ),
            Ok(_) => None,
            Err(error) => Some(
                finding(
                    file,
                    CheckKind::LandscapeOrientation,
                    "file.validation.image_unreadable",
                )
                .with_param("error", error.as_str()),
            ),
        }
    }
}

impl FileValidator for ManagedFileValidator {
    fn validate(&self, file: &ManagedFile, report: &EventSender) -> bool {
        let mut findings = Vec::new();
        let mut dimensions = None;

        for check in CheckKind::ALL {
            if !self.applies(check) {
                continue;
            }

            let result = match check {
                CheckKind::Size => self.check_size(file),
                CheckKind::Dimensions if file.is_image() => {
                    let dims = dimensions.get_or_insert_with(|| image_dimensions(file));
                    self.check_dimensions(file, dims)
                }
                CheckKind::LandscapeOrientation if file.is_image() => {
                    let dims = dimensions.get_or_insert_with(|| image_dimensions(file));
                    self.check_landscape(file, dims)
                }
                _ => None,
            };

            findings.extend(result);
        }

        let valid = findings.is_empty();
        for event in findings {
            tracing::debug!(
                name = %file.name(),
                message = ?event.message,
                params = ?event.message_params,
                "File failed validation"
            );
            emit(report, event);
        }

        valid
    }
}

fn finding(file: &ManagedFile, check: CheckKind, message: &str) -> TransferEvent {
    TransferEvent::new(TransferEventKind::ValidationError, file)
        .with_message(message)
        .with_param("check", check.to_string())
}

/// Read width and height from the image header without decoding pixels.
fn image_dimensions(file: &ManagedFile) -> Result<(u32, u32), String> {
    ImageReader::new(Cursor::new(file.content().as_ref()))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}
