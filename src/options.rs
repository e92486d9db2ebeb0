//! Renderer flags.
//!
//! The renderer accepts a closed set of flags plus free-form extras.
//! [`RenderOptions`] validates everything up front and produces the final
//! argument list with [`RenderOptions::to_args`], so a bad crop value or an
//! unbalanced quote is rejected before any process is spawned.

use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Paper sizes understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSize {
    Letter,
    A4,
    A3,
    Tabloid,
    Archb,
}

impl PaperSize {
    pub const ALL: [PaperSize; 5] = [
        PaperSize::Letter,
        PaperSize::A4,
        PaperSize::A3,
        PaperSize::Tabloid,
        PaperSize::Archb,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaperSize::Letter => "letter",
            PaperSize::A4 => "a4",
            PaperSize::A3 => "a3",
            PaperSize::Tabloid => "tabloid",
            PaperSize::Archb => "archb",
        }
    }
}

/// Card sizes understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardSize {
    Standard,
    StandardDouble,
    Japanese,
    Poker,
    PokerHalf,
    Bridge,
    BridgeSquare,
    Domino,
    DominoSquare,
}

impl CardSize {
    pub const ALL: [CardSize; 9] = [
        CardSize::Standard,
        CardSize::StandardDouble,
        CardSize::Japanese,
        CardSize::Poker,
        CardSize::PokerHalf,
        CardSize::Bridge,
        CardSize::BridgeSquare,
        CardSize::Domino,
        CardSize::DominoSquare,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CardSize::Standard => "standard",
            CardSize::StandardDouble => "standard_double",
            CardSize::Japanese => "japanese",
            CardSize::Poker => "poker",
            CardSize::PokerHalf => "poker_half",
            CardSize::Bridge => "bridge",
            CardSize::BridgeSquare => "bridge_square",
            CardSize::Domino => "domino",
            CardSize::DominoSquare => "domino_square",
        }
    }
}

macro_rules! str_enum_impls {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = WorkflowError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| {
                        let known: Vec<&str> = $ty::ALL.iter().map(|v| v.as_str()).collect();
                        WorkflowError::InvalidOption(format!(
                            "unknown {} '{}' (expected one of: {})",
                            $what,
                            s,
                            known.join(", ")
                        ))
                    })
            }
        }
    };
}

str_enum_impls!(PaperSize, "paper size");
str_enum_impls!(CardSize, "card size");

/// Unit suffix for the crop amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CropUnit {
    #[default]
    Percent,
    Millimetres,
    Inches,
}

impl FromStr for CropUnit {
    type Err = WorkflowError;

    /// Blank and `%` mean percent; `mm` and `in` are case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "%" => Ok(CropUnit::Percent),
            "mm" => Ok(CropUnit::Millimetres),
            "in" => Ok(CropUnit::Inches),
            other => Err(WorkflowError::InvalidOption(format!(
                "crop unit must be '%', 'mm' or 'in', got '{other}'"
            ))),
        }
    }
}

/// Crop amount with its unit. Always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    value: f64,
    unit: CropUnit,
}

impl Crop {
    pub fn new(value: f64, unit: CropUnit) -> Result<Self, WorkflowError> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(WorkflowError::InvalidOption(format!(
                "crop value must be between 0 and 100, got {value}"
            )));
        }
        Ok(Self { value, unit })
    }

    /// Parse the two form fields (`"6.5"`, `"mm"`).
    pub fn parse(value: &str, unit: &str) -> Result<Self, WorkflowError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(WorkflowError::InvalidOption("crop value is required".into()));
        }
        let v: f64 = value.parse().map_err(|_| {
            WorkflowError::InvalidOption(format!("crop value must be a number, got '{value}'"))
        })?;
        Self::new(v, unit.parse()?)
    }

    /// The renderer argument: bare number for percent, suffixed otherwise.
    pub fn to_arg(&self) -> String {
        match self.unit {
            CropUnit::Percent => format!("{}", self.value),
            CropUnit::Millimetres => format!("{}mm", self.value),
            CropUnit::Inches => format!("{}in", self.value),
        }
    }
}

/// Renderer flags collected from the option form.
///
/// # Example
/// ```rust
/// use deckpress::{Crop, CropUnit, PaperSize, RenderOptions};
///
/// let args = RenderOptions::builder()
///     .only_fronts(true)
///     .ppi(600)
///     .paper_size(PaperSize::A4)
///     .crop(Crop::new(2.0, CropUnit::Millimetres).unwrap())
///     .extra("--name 'My Deck'")
///     .build()
///     .unwrap()
///     .to_args();
/// assert_eq!(
///     args,
///     ["--only_fronts", "--ppi", "600", "--paper_size", "a4", "--crop", "2mm", "--name", "My Deck"]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub only_fronts: bool,
    pub ppi: Option<u32>,
    pub quality: Option<u8>,
    pub extend_corners: Option<u32>,
    pub paper_size: Option<PaperSize>,
    pub crop: Option<Crop>,
    pub load_offset: bool,
    pub card_size: Option<CardSize>,
    /// Already tokenised extra arguments, appended verbatim.
    pub extra_args: Vec<String>,
}

impl RenderOptions {
    pub fn builder() -> RenderOptionsBuilder {
        RenderOptionsBuilder::default()
    }

    /// Flatten into the renderer argument list, in a fixed flag order.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.only_fronts {
            args.push("--only_fronts".to_string());
        }
        if let Some(ppi) = self.ppi {
            args.extend(["--ppi".to_string(), ppi.to_string()]);
        }
        if let Some(q) = self.quality {
            args.extend(["--quality".to_string(), q.to_string()]);
        }
        if let Some(c) = self.extend_corners {
            args.extend(["--extend_corners".to_string(), c.to_string()]);
        }
        if let Some(p) = self.paper_size {
            args.extend(["--paper_size".to_string(), p.to_string()]);
        }
        if let Some(ref crop) = self.crop {
            args.extend(["--crop".to_string(), crop.to_arg()]);
        }
        if self.load_offset {
            args.push("--load_offset".to_string());
        }
        if let Some(cs) = self.card_size {
            args.extend(["--card_size".to_string(), cs.to_string()]);
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Builder for [`RenderOptions`]. Validation errors are deferred to
/// [`build`](RenderOptionsBuilder::build) so setters stay chainable.
#[derive(Debug, Default)]
pub struct RenderOptionsBuilder {
    options: RenderOptions,
    extra: Option<String>,
}

impl RenderOptionsBuilder {
    pub fn only_fronts(mut self, v: bool) -> Self {
        self.options.only_fronts = v;
        self
    }

    pub fn ppi(mut self, ppi: u32) -> Self {
        self.options.ppi = Some(ppi);
        self
    }

    /// Output quality, clamped to 0–100.
    pub fn quality(mut self, q: u8) -> Self {
        self.options.quality = Some(q.min(100));
        self
    }

    /// Shorthand for the form's "high quality" checkbox.
    pub fn high_quality(self, v: bool) -> Self {
        if v {
            self.quality(100)
        } else {
            self
        }
    }

    pub fn extend_corners(mut self, px: u32) -> Self {
        self.options.extend_corners = Some(px);
        self
    }

    pub fn paper_size(mut self, size: PaperSize) -> Self {
        self.options.paper_size = Some(size);
        self
    }

    pub fn crop(mut self, crop: Crop) -> Self {
        self.options.crop = Some(crop);
        self
    }

    pub fn load_offset(mut self, v: bool) -> Self {
        self.options.load_offset = v;
        self
    }

    pub fn card_size(mut self, size: CardSize) -> Self {
        self.options.card_size = Some(size);
        self
    }

    /// Free-form extras, split with POSIX shell quoting rules at build time.
    pub fn extra(mut self, raw: impl Into<String>) -> Self {
        self.extra = Some(raw.into());
        self
    }

    pub fn build(mut self) -> Result<RenderOptions, WorkflowError> {
        if let Some(raw) = self.extra.take() {
            let raw = raw.trim();
            if !raw.is_empty() {
                self.options.extra_args = shell_words::split(raw).map_err(|e| {
                    WorkflowError::InvalidOption(format!("invalid custom options '{raw}': {e}"))
                })?;
            }
        }
        if self.options.ppi == Some(0) {
            return Err(WorkflowError::InvalidOption("PPI must be positive".into()));
        }
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_percent_is_bare_number() {
        let crop = Crop::parse("6.5", "%").unwrap();
        assert_eq!(crop.to_arg(), "6.5");
        assert_eq!(Crop::parse("6.5", "").unwrap().to_arg(), "6.5");
    }

    #[test]
    fn crop_with_length_unit_is_suffixed() {
        assert_eq!(Crop::parse("2", "mm").unwrap().to_arg(), "2mm");
        assert_eq!(Crop::parse("0.25", "IN").unwrap().to_arg(), "0.25in");
    }

    #[test]
    fn crop_out_of_range_is_rejected_for_any_unit() {
        for unit in ["%", "mm", "in", ""] {
            let err = Crop::parse("110", unit).unwrap_err();
            assert!(
                matches!(err, WorkflowError::InvalidOption(ref m) if m.contains("between 0 and 100")),
                "unit {unit:?}: {err}"
            );
        }
        assert!(Crop::new(-0.1, CropUnit::Percent).is_err());
        assert!(Crop::new(f64::NAN, CropUnit::Percent).is_err());
        assert!(Crop::new(100.0, CropUnit::Percent).is_ok());
    }

    #[test]
    fn crop_rejects_bad_unit_and_text() {
        assert!(Crop::parse("5", "cm").is_err());
        assert!(Crop::parse("five", "%").is_err());
        assert!(Crop::parse("  ", "%").is_err());
    }

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("A4".parse::<PaperSize>().unwrap(), PaperSize::A4);
        assert_eq!(
            "poker_half".parse::<CardSize>().unwrap(),
            CardSize::PokerHalf
        );
        let err = "legal".parse::<PaperSize>().unwrap_err().to_string();
        assert!(err.contains("letter"), "got: {err}");
    }

    #[test]
    fn full_flag_order() {
        let args = RenderOptions::builder()
            .load_offset(true)
            .card_size(CardSize::Japanese)
            .high_quality(true)
            .extend_corners(10)
            .only_fronts(true)
            .build()
            .unwrap()
            .to_args();
        assert_eq!(
            args,
            vec![
                "--only_fronts",
                "--quality",
                "100",
                "--extend_corners",
                "10",
                "--load_offset",
                "--card_size",
                "japanese"
            ]
        );
    }

    #[test]
    fn extras_are_shell_tokenised() {
        let opts = RenderOptions::builder()
            .extra(r#"--name "Sealed Pool" --output_path out/deck.pdf"#)
            .build()
            .unwrap();
        assert_eq!(
            opts.extra_args,
            vec!["--name", "Sealed Pool", "--output_path", "out/deck.pdf"]
        );
    }

    #[test]
    fn unbalanced_quote_is_rejected() {
        let err = RenderOptions::builder()
            .extra("--name 'oops")
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidOption(_)));
    }

    #[test]
    fn empty_options_produce_no_args() {
        assert!(RenderOptions::default().to_args().is_empty());
        assert!(RenderOptions::builder()
            .extra("   ")
            .build()
            .unwrap()
            .to_args()
            .is_empty());
    }
}
