//! Class names and colors of the ripeness categories.
//!
use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use image::Rgb;

/// Ripeness classes used when neither a labels file nor model metadata name them.
pub const DEFAULT_CLASSES: [&str; 6] = [
    "abnormal",
    "empty_bunch",
    "overripe",
    "ripe",
    "underripe",
    "unripe",
];

/// Ids above this are treated as a broken `names` entry.
const MAX_CLASSES: usize = 4096;

const PALETTE: [[u8; 3]; 10] = [
    [230, 25, 75],   // red
    [60, 180, 75],   // green
    [255, 140, 0],   // orange
    [0, 130, 200],   // blue
    [145, 30, 180],  // purple
    [240, 50, 230],  // magenta
    [70, 240, 240],  // cyan
    [210, 245, 60],  // lime
    [128, 128, 0],   // olive
    [128, 128, 128], // gray
];

/// Class names indexed by class id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Labels {
    names: Vec<String>,
}

impl Default for Labels {
    fn default() -> Self {
        Self::new(DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect())
    }
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Read one class name per line. Blank lines and `#` comments are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;

        let names: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_owned)
            .collect();

        if names.is_empty() {
            bail!("labels file {} contains no class names", path.display());
        }

        Ok(Self::new(names))
    }

    /// Parse the `names` metadata that YOLO exporters write into the ONNX file.
    ///
    /// The value is a Python dict literal like `{0: 'ripe', 1: "unripe"}`. Ids missing from the
    /// dict get a generated name.
    pub fn from_python_dict(value: &str) -> Option<Self> {
        let body = value.trim().strip_prefix('{')?.strip_suffix('}')?;

        let mut entries: Vec<(usize, String)> = Vec::new();
        let mut rest = body.trim_start();
        while !rest.is_empty() {
            let (key, after) = rest.split_once(':')?;
            let id: usize = key.trim().parse().ok()?;
            if id >= MAX_CLASSES {
                return None;
            }

            let after = after.trim_start();
            let quote = after.chars().next()?;
            if quote != '\'' && quote != '"' {
                return None;
            }
            let after = &after[1..];
            let end = after.find(quote)?;
            entries.push((id, after[..end].to_owned()));

            rest = after[end + 1..].trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        let len = entries.iter().map(|(id, _)| id + 1).max()?;
        let mut names: Vec<String> = (0..len).map(generated_name).collect();
        for (id, name) in entries {
            names[id] = name;
        }

        Some(Self::new(names))
    }

    /// Pick the class names to use: an explicit labels file, else the model's `names`
    /// metadata, else the built-in ripeness classes.
    pub fn resolve(file: Option<Labels>, names_meta: Option<&str>) -> Self {
        if let Some(labels) = file {
            return labels;
        }

        match names_meta.map(|value| (value, Self::from_python_dict(value))) {
            Some((_, Some(labels))) => labels,
            Some((value, None)) => {
                log::warn!("Ignoring unparsable `names` metadata {:?}", value);
                Self::default()
            }
            None => Self::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of a class, `class_<id>` for unknown ids.
    pub fn name(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| generated_name(class_id))
    }
}

/// Color of a class. The palette repeats after ten classes.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

fn generated_name(class_id: usize) -> String {
    format!("class_{class_id}")
}
