// ── Model catalog ──
//
// Static SKU → factory table, consulted when a device is first seen.
// A model missing from the table is reported to the caller, never a panic.
// The kind recorded for a model is whatever its factory builds.

use std::collections::HashMap;

use crate::model::{DeviceConfig, DeviceKind, GoveeDevice};

/// Builds a device from its settings.
pub type DeviceFactory = fn(&DeviceConfig) -> GoveeDevice;

fn white_light(config: &DeviceConfig) -> GoveeDevice {
    GoveeDevice::new(config, DeviceKind::WhiteLight)
}

fn rgb_light(config: &DeviceConfig) -> GoveeDevice {
    GoveeDevice::new(config, DeviceKind::RgbLight)
}

fn rgbic_light(config: &DeviceConfig) -> GoveeDevice {
    GoveeDevice::new(config, DeviceKind::RgbicLight)
}

fn humidifier(config: &DeviceConfig) -> GoveeDevice {
    GoveeDevice::new(config, DeviceKind::Humidifier)
}

fn purifier(config: &DeviceConfig) -> GoveeDevice {
    GoveeDevice::new(config, DeviceKind::Purifier)
}

const WHITE_LIGHTS: &[&str] = &["H6001", "H6008", "H6010"];
const RGB_LIGHTS: &[&str] = &[
    "H6003", "H6004", "H6006", "H6009", "H6052", "H6058", "H6072", "H6104", "H6109", "H610A",
    "H6110", "H6159", "H6163", "H6195", "H7005",
];
const RGBIC_LIGHTS: &[&str] = &[
    "H6117", "H611A", "H6143", "H6144", "H6160", "H6172", "H6182", "H6199", "H619A", "H619B",
    "H619C", "H619Z", "H61A0", "H61A2", "H7020", "H7021", "H7050",
];
const HUMIDIFIERS: &[&str] = &["H7141", "H7142", "H7143"];
const PURIFIERS: &[&str] = &["H7120", "H7121", "H7122", "H7123"];

/// Model-keyed factory registry.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    factories: HashMap<String, (DeviceKind, DeviceFactory)>,
}

impl DeviceCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of every supported model.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        let families: [(&[&str], DeviceFactory); 5] = [
            (WHITE_LIGHTS, white_light),
            (RGB_LIGHTS, rgb_light),
            (RGBIC_LIGHTS, rgbic_light),
            (HUMIDIFIERS, humidifier),
            (PURIFIERS, purifier),
        ];
        for (models, factory) in families {
            for model in models {
                catalog.register(model, factory);
            }
        }
        catalog
    }

    /// Add or replace the factory for `model`.
    ///
    /// The factory runs once against a blank config to learn its kind.
    pub fn register(&mut self, model: &str, factory: DeviceFactory) {
        let model = model.to_ascii_uppercase();
        let kind = factory(&DeviceConfig {
            model: model.clone(),
            ..DeviceConfig::default()
        })
        .kind;
        self.factories.insert(model, (kind, factory));
    }

    pub fn kind_of(&self, model: &str) -> Option<DeviceKind> {
        self.factories
            .get(&model.to_ascii_uppercase())
            .map(|(kind, _)| *kind)
    }

    /// Build a device for `config`, or `None` if its model is unknown.
    pub fn create(&self, config: &DeviceConfig) -> Option<GoveeDevice> {
        self.factories
            .get(&config.model.to_ascii_uppercase())
            .map(|(_, factory)| factory(config))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn known_models_resolve_to_their_family() {
        let catalog = DeviceCatalog::standard();
        assert_eq!(catalog.kind_of("H6160"), Some(DeviceKind::RgbicLight));
        assert_eq!(catalog.kind_of("h6003"), Some(DeviceKind::RgbLight));
        assert_eq!(catalog.kind_of("H7141"), Some(DeviceKind::Humidifier));
        assert_eq!(catalog.kind_of("H7122"), Some(DeviceKind::Purifier));
    }

    #[test]
    fn unknown_model_is_none() {
        let catalog = DeviceCatalog::standard();
        let config = DeviceConfig {
            device_id: "x".into(),
            model: "H0000".into(),
            ..DeviceConfig::default()
        };
        assert!(catalog.create(&config).is_none());
        assert!(catalog.kind_of("H0000").is_none());
    }

    #[test]
    fn create_uses_registered_factory() {
        let mut catalog = DeviceCatalog::new();
        assert!(catalog.is_empty());
        catalog.register("H9999", white_light);

        let config = DeviceConfig {
            device_id: "dev".into(),
            model: "H9999".into(),
            ..DeviceConfig::default()
        };
        let device = catalog.create(&config).unwrap();
        assert_eq!(device.kind, DeviceKind::WhiteLight);
        assert_eq!(device.name, "H9999");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn registered_kind_follows_the_factory() {
        let mut catalog = DeviceCatalog::new();
        catalog.register("H9999", humidifier);
        assert_eq!(catalog.kind_of("H9999"), Some(DeviceKind::Humidifier));

        catalog.register("h9999", purifier);
        let config = DeviceConfig {
            device_id: "dev".into(),
            model: "H9999".into(),
            ..DeviceConfig::default()
        };
        assert_eq!(catalog.kind_of("H9999"), Some(DeviceKind::Purifier));
        assert_eq!(catalog.create(&config).unwrap().kind, DeviceKind::Purifier);
    }

    #[test]
    fn standard_catalog_kinds_match_built_devices() {
        let catalog = DeviceCatalog::standard();
        for model in RGB_LIGHTS.iter().chain(HUMIDIFIERS).chain(WHITE_LIGHTS) {
            let config = DeviceConfig {
                device_id: "dev".into(),
                model: (*model).into(),
                ..DeviceConfig::default()
            };
            let device = catalog.create(&config).unwrap();
            assert_eq!(catalog.kind_of(model), Some(device.kind), "{model}");
        }
    }
}
