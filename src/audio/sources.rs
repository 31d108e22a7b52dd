//! Audio input enumeration

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::backend::{AudioBackend, RawInput};
use crate::error::{Error, ErrorKind, Result};

/// Label fragments of DJ controllers and virtual cables, highest priority first
pub const DEFAULT_CONTROLLER_KEYWORDS: &[&str] = &[
    "ddj-rev1",
    "ddj",
    "pioneer",
    "serato",
    "virtual audio",
    "vac",
    "voicemeeter",
    "obs",
    "audio repeater",
    "virtual cable",
];

const DEFAULT_ALIAS_PREFIXES: &[&str] = &["Default - ", "Default \u{2013} ", "Default: "];

/// Audio input information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    /// Opaque identifier, pass it back to `CaptureSession::start`
    pub id: String,

    /// Unique, human-readable label
    pub display_name: String,

    /// Label matches one of the catalog's preferred keywords
    pub is_preferred: bool,
}

/// Enumerates capture inputs through an [`AudioBackend`]
#[derive(Clone)]
pub struct DeviceCatalog {
    backend: Arc<dyn AudioBackend>,
    preferred_keywords: Vec<String>,
}

impl DeviceCatalog {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            preferred_keywords: DEFAULT_CONTROLLER_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn preferred_keywords(&self) -> &[String] {
        &self.preferred_keywords
    }

    /// List available capture inputs.
    ///
    /// A brief capture probe runs first so platforms that hide labels until
    /// access is granted reveal them. If the probe fails, enumeration still
    /// runs and unlabeled inputs get placeholders.
    pub fn list_inputs(&self) -> Result<Vec<InputDevice>> {
        let probe = self.backend.probe_access();
        if let Err(e) = &probe {
            log::warn!("Input probe failed, labels may be generic: {}", e);
        }

        let raw = self.backend.enumerate_inputs().map_err(|e| {
            let denied = e.kind() == ErrorKind::PermissionDenied
                || matches!(&probe, Err(p) if p.kind() == ErrorKind::PermissionDenied);
            if denied {
                Error::PermissionDenied(e.to_string())
            } else {
                e
            }
        })?;

        let mut devices = catalog_inputs(&raw);
        for device in &mut devices {
            device.is_preferred = matches_keyword(&device.display_name, &self.preferred_keywords);
        }

        log::info!("Listed {} audio input(s)", devices.len());
        Ok(devices)
    }

    /// The best preferred input according to this catalog's keywords
    pub fn find_preferred<'a>(&self, devices: &'a [InputDevice]) -> Option<&'a InputDevice> {
        find_preferred(devices, &self.preferred_keywords)
    }
}

/// Turn raw platform inputs into a clean, uniquely labeled list.
///
/// Duplicate ids are dropped, missing labels become `Input N`, `Default - X`
/// aliases are removed when `X` is listed too, and repeated labels get a
/// ` (2)`, ` (3)`... suffix.
pub fn catalog_inputs(raw: &[RawInput]) -> Vec<InputDevice> {
    let mut seen_ids = HashSet::new();
    let labeled: Vec<(String, String)> = raw
        .iter()
        .filter(|input| seen_ids.insert(input.id.as_str()))
        .enumerate()
        .map(|(index, input)| {
            let label = input
                .label
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Input {}", index + 1));
            (input.id.clone(), label)
        })
        .collect();

    let concrete: HashSet<&str> = labeled
        .iter()
        .filter(|(_, label)| alias_base(label).is_none())
        .map(|(_, label)| label.as_str())
        .collect();

    let kept: Vec<&(String, String)> = labeled
        .iter()
        .filter(|(_, label)| !alias_base(label).is_some_and(|base| concrete.contains(base)))
        .collect();

    // Suffixed names must not collide with a label some other input really has
    let reserved: HashSet<&str> = kept
        .iter()
        .copied()
        .map(|(_, label)| label.as_str())
        .collect();
    let mut emitted: HashSet<String> = HashSet::new();

    kept.into_iter()
        .map(|(id, label)| {
            let display_name = if emitted.insert(label.clone()) {
                label.clone()
            } else {
                (2..)
                    .map(|n| format!("{label} ({n})"))
                    .find(|name| !reserved.contains(name.as_str()) && !emitted.contains(name))
                    .unwrap_or_else(|| format!("{label} ({id})"))
            };
            emitted.insert(display_name.clone());
            InputDevice {
                id: id.clone(),
                display_name,
                is_preferred: false,
            }
        })
        .collect()
}

fn alias_base(label: &str) -> Option<&str> {
    DEFAULT_ALIAS_PREFIXES
        .iter()
        .find_map(|prefix| label.strip_prefix(prefix))
        .map(str::trim)
}

fn matches_keyword(label: &str, keywords: &[String]) -> bool {
    let label = label.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.is_empty() && label.contains(&k.to_lowercase()))
}

/// First device matching a keyword, trying keywords in order.
///
/// `None` is an ordinary outcome: nothing recognisable is plugged in.
pub fn find_preferred<'a, S: AsRef<str>>(
    devices: &'a [InputDevice],
    keywords: &[S],
) -> Option<&'a InputDevice> {
    keywords
        .iter()
        .map(|k| k.as_ref().to_lowercase())
        .filter(|k| !k.is_empty())
        .find_map(|keyword| {
            devices
                .iter()
                .find(|d| d.display_name.to_lowercase().contains(&keyword))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeBackend;

    fn raw(id: &str, label: Option<&str>) -> RawInput {
        RawInput {
            id: id.to_string(),
            label: label.map(str::to_string),
        }
    }

    fn names(devices: &[InputDevice]) -> Vec<&str> {
        devices.iter().map(|d| d.display_name.as_str()).collect()
    }

    #[test]
    fn identical_labels_are_disambiguated() {
        let devices = catalog_inputs(&[
            raw("a", Some("Microphone")),
            raw("b", Some("Microphone")),
            raw("c", Some("Microphone")),
        ]);
        assert_eq!(
            names(&devices),
            vec!["Microphone", "Microphone (2)", "Microphone (3)"]
        );
    }

    #[test]
    fn suffix_skips_labels_already_in_use() {
        let devices = catalog_inputs(&[
            raw("a", Some("Mic")),
            raw("b", Some("Mic")),
            raw("c", Some("Mic (2)")),
        ]);
        assert_eq!(names(&devices), vec!["Mic", "Mic (3)", "Mic (2)"]);

        let devices = catalog_inputs(&[
            raw("a", Some("Mic (2)")),
            raw("b", Some("Mic")),
            raw("c", Some("Mic")),
            raw("d", Some("Mic (2)")),
        ]);
        let labels = names(&devices);
        let unique: HashSet<&str> = labels.iter().copied().collect();
        assert_eq!(unique.len(), labels.len(), "labels: {labels:?}");
    }

    #[test]
    fn duplicate_ids_are_dropped() {
        let devices = catalog_inputs(&[raw("a", Some("Mic")), raw("a", Some("Mic again"))]);
        assert_eq!(names(&devices), vec!["Mic"]);
    }

    #[test]
    fn missing_labels_get_placeholders() {
        let devices = catalog_inputs(&[raw("a", None), raw("b", Some("  ")), raw("c", Some("USB"))]);
        assert_eq!(names(&devices), vec!["Input 1", "Input 2", "USB"]);
    }

    #[test]
    fn default_alias_is_collapsed_when_base_exists() {
        let devices = catalog_inputs(&[
            raw("default", Some("Default - USB Audio")),
            raw("usb", Some("USB Audio")),
            raw("comm", Some("Default: Headset")),
        ]);
        assert_eq!(names(&devices), vec!["USB Audio", "Default: Headset"]);
    }

    #[test]
    fn en_dash_alias_is_collapsed() {
        let devices = catalog_inputs(&[
            raw("usb", Some("USB Audio")),
            raw("default", Some("Default \u{2013} USB Audio")),
        ]);
        assert_eq!(names(&devices), vec!["USB Audio"]);
    }

    #[test]
    fn find_preferred_respects_keyword_priority() {
        let devices = catalog_inputs(&[
            raw("a", Some("Pioneer DJ Audio")),
            raw("b", Some("DDJ-REV1 Line")),
        ]);
        let found = find_preferred(&devices, DEFAULT_CONTROLLER_KEYWORDS).unwrap();
        assert_eq!(found.id, "b");
    }

    #[test]
    fn find_preferred_returns_none_without_match() {
        let devices = catalog_inputs(&[raw("a", Some("Built-in Microphone"))]);
        assert!(find_preferred(&devices, DEFAULT_CONTROLLER_KEYWORDS).is_none());
        assert!(find_preferred::<&str>(&devices, &[]).is_none());
    }

    #[test]
    fn list_inputs_flags_preferred_devices() {
        let backend = Arc::new(FakeBackend::with_inputs(&[
            ("input:mic", Some("Built-in Microphone")),
            ("input:vm", Some("VoiceMeeter Output")),
        ]));
        let catalog = DeviceCatalog::new(backend);

        let devices = catalog.list_inputs().unwrap();
        assert!(!devices[0].is_preferred);
        assert!(devices[1].is_preferred);
        assert_eq!(catalog.find_preferred(&devices).unwrap().id, "input:vm");
    }

    #[test]
    fn failed_probe_is_not_fatal() {
        let backend = FakeBackend::with_inputs(&[("input:1", None), ("input:2", None)]);
        *backend.probe_error.lock() = Some(Error::DeviceBusy("probe".into()));
        let catalog = DeviceCatalog::new(Arc::new(backend));

        let devices = catalog.list_inputs().unwrap();
        assert_eq!(names(&devices), vec!["Input 1", "Input 2"]);
    }

    #[test]
    fn blocked_enumeration_is_permission_denied() {
        let backend = FakeBackend::default();
        *backend.probe_error.lock() = Some(Error::PermissionDenied("user refused".into()));
        *backend.enumerate_error.lock() = Some(Error::InitializationError("no labels".into()));
        let catalog = DeviceCatalog::new(Arc::new(backend));

        let err = catalog.list_inputs().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn other_enumeration_errors_pass_through() {
        let backend = FakeBackend::default();
        *backend.enumerate_error.lock() = Some(Error::InitializationError("backend down".into()));
        let catalog = DeviceCatalog::new(Arc::new(backend));

        let err = catalog.list_inputs().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InitializationError);
    }
}
