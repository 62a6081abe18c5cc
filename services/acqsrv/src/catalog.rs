//! Register catalog
//!
//! Immutable per-device-type table of measurement points: where each value lives in
//! the holding-register space, how many words it spans, how to decode it and how to
//! scale it. Device-specific behaviour is data in this table, never code.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{AcqSrvError, Result};
use crate::transport::frame::MAX_READ_REGISTERS;

/// Register encoding of a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int16,
    Uint16,
    /// High word first (AB)
    Int32,
    /// Low word first (BA / CDAB)
    Int32Swap,
    Uint32,
    Uint32Swap,
    /// IEEE-754 single from the AB pattern
    Float,
    /// IEEE-754 single from the BA pattern
    FloatSwap,
}

impl DataType {
    /// Number of 16-bit registers the encoding occupies
    pub const fn word_count(self) -> u16 {
        match self {
            DataType::Int16 | DataType::Uint16 => 1,
            DataType::Int32
            | DataType::Int32Swap
            | DataType::Uint32
            | DataType::Uint32Swap
            | DataType::Float
            | DataType::FloatSwap => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DataType::Int16 => "INT16",
            DataType::Uint16 => "UINT16",
            DataType::Int32 => "INT32",
            DataType::Int32Swap => "INT32_SWAP",
            DataType::Uint32 => "UINT32",
            DataType::Uint32Swap => "UINT32_SWAP",
            DataType::Float => "FLOAT",
            DataType::FloatSwap => "FLOAT_SWAP",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = AcqSrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INT16" => Ok(DataType::Int16),
            "UINT16" => Ok(DataType::Uint16),
            "INT32" => Ok(DataType::Int32),
            "INT32_SWAP" => Ok(DataType::Int32Swap),
            "UINT32" => Ok(DataType::Uint32),
            "UINT32_SWAP" => Ok(DataType::Uint32Swap),
            "FLOAT" => Ok(DataType::Float),
            "FLOAT_SWAP" => Ok(DataType::FloatSwap),
            other => Err(AcqSrvError::config(format!("Unknown data type: {other}"))),
        }
    }
}

/// One decodable measurement for a device type
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterPoint {
    /// Device type key, e.g. "k24"
    pub device_type: String,
    /// Device model label, e.g. "flow meter"
    pub model: String,
    /// Stable machine name, unique within the device type
    pub code: String,
    pub display_name: String,
    /// Zero-based holding register offset
    pub address: u16,
    pub word_count: u16,
    pub data_type: DataType,
    /// Multiplier applied to the decoded raw value
    pub scale: f64,
    pub unit: String,
}

impl RegisterPoint {
    pub fn new(
        device_type: impl Into<String>,
        code: impl Into<String>,
        address: u16,
        data_type: DataType,
        scale: f64,
        unit: impl Into<String>,
    ) -> Self {
        let code = code.into();
        Self {
            device_type: device_type.into(),
            model: String::new(),
            display_name: code.clone(),
            code,
            address,
            word_count: data_type.word_count(),
            data_type,
            scale,
            unit: unit.into(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// First register past the end of this point
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + u32::from(self.word_count)
    }
}

/// Contiguous holding-register range read in one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWindow {
    pub start: u16,
    pub count: u16,
}

impl RegisterWindow {
    /// Smallest window covering every point, `None` for an empty slice
    pub fn covering(points: &[RegisterPoint]) -> Option<Self> {
        let start = points.iter().map(|p| p.address).min()?;
        let end = points.iter().map(RegisterPoint::end_address).max()?;
        let count = end.saturating_sub(u32::from(start));

        Some(Self {
            start,
            count: u16::try_from(count).unwrap_or(u16::MAX),
        })
    }

    /// Offset of a point inside the returned word buffer
    pub fn offset_of(&self, point: &RegisterPoint) -> usize {
        usize::from(point.address.saturating_sub(self.start))
    }
}

/// Built-in device table: (device_type, model, code, display name, address, type, scale, unit)
type PointDef = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    u16,
    DataType,
    f64,
    &'static str,
);

// Word orders follow the most recent field revision of each device.
// K24 and SUI-201 are read high word first; BS600 floats low word first.
const BUILTIN_POINTS: &[PointDef] = &[
    // K24 flow meter
    ("k24", "flow meter", "Total flow", "总累计流量", 0x0009, DataType::Int32, 0.001, "L"),
    ("k24", "flow meter", "Avg flow rate", "平均流量", 0x000F, DataType::Int32, 0.01, "L/min"),
    ("k24", "flow meter", "Flow rate", "瞬时流量", 0x0017, DataType::Int32, 0.01, "L"),
    // BS600 differential pressure transmitter
    ("bs600", "differential pressure gauge", "Pressure difference", "差压", 0x0002, DataType::FloatSwap, 1.0, "mpa"),
    // Single-phase AC power meter
    ("acpower", "AC power meter", "Voltage", "电压", 0x0004, DataType::Int16, 0.1, "V"),
    ("acpower", "AC power meter", "Current", "电流", 0x0005, DataType::Int16, 0.0001, "A"),
    ("acpower", "AC power meter", "Input power", "有功功率", 0x0000, DataType::Int16, 0.01, "W"),
    // SUI-201 DC power meter
    ("sui-201", "DC power meter", "Voltage", "电压", 0x0BB8, DataType::Int32, 0.001, "V"),
    ("sui-201", "DC power meter", "Current", "电流", 0x0BBA, DataType::Int32, 0.001, "A"),
    ("sui-201", "DC power meter", "Power", "功率", 0x0BBC, DataType::Int32, 0.001, "W"),
    ("sui-201", "DC power meter", "Accumulated electricity", "累计电量", 0x0BBE, DataType::Int32, 0.0001, "Wh"),
];

/// Read-only register catalog keyed by device type
#[derive(Debug, Clone, Default)]
pub struct RegisterCatalog {
    by_type: BTreeMap<String, Vec<RegisterPoint>>,
}

impl RegisterCatalog {
    /// Build a catalog from points, keeping their order within each device type
    pub fn new(points: impl IntoIterator<Item = RegisterPoint>) -> Self {
        let mut by_type: BTreeMap<String, Vec<RegisterPoint>> = BTreeMap::new();
        for point in points {
            by_type
                .entry(point.device_type.clone())
                .or_default()
                .push(point);
        }
        Self { by_type }
    }

    /// Catalog of the supported field devices
    pub fn builtin() -> Self {
        Self::new(BUILTIN_POINTS.iter().map(
            |&(device_type, model, code, display_name, address, data_type, scale, unit)| {
                RegisterPoint::new(device_type, code, address, data_type, scale, unit)
                    .with_display_name(display_name)
                    .with_model(model)
            },
        ))
    }

    /// Points of a device type in catalog order; empty for unknown types
    pub fn points_for(&self, device_type: &str) -> &[RegisterPoint] {
        self.by_type
            .get(device_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find(&self, device_type: &str, code: &str) -> Option<&RegisterPoint> {
        self.points_for(device_type).iter().find(|p| p.code == code)
    }

    pub fn contains_type(&self, device_type: &str) -> bool {
        self.by_type.contains_key(device_type)
    }

    pub fn device_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    /// Covering read window for a set of points
    pub fn window_for(points: &[RegisterPoint]) -> Option<RegisterWindow> {
        RegisterWindow::covering(points)
    }

    /// Check internal consistency of the table
    pub fn validate(&self) -> Result<()> {
        for (device_type, points) in &self.by_type {
            let mut codes = HashSet::new();
            for point in points {
                if !codes.insert(point.code.as_str()) {
                    return Err(AcqSrvError::config(format!(
                        "Duplicate point code '{}' for device type '{}'",
                        point.code, device_type
                    )));
                }
                if point.word_count != point.data_type.word_count() {
                    return Err(AcqSrvError::config(format!(
                        "Point '{}/{}' spans {} words but {} needs {}",
                        device_type,
                        point.code,
                        point.word_count,
                        point.data_type,
                        point.data_type.word_count()
                    )));
                }
                if !point.scale.is_finite() {
                    return Err(AcqSrvError::config(format!(
                        "Point '{}/{}' has a non-finite scale",
                        device_type, point.code
                    )));
                }
            }

            if let Some(window) = RegisterWindow::covering(points) {
                if window.count > MAX_READ_REGISTERS {
                    return Err(AcqSrvError::config(format!(
                        "Device type '{}' needs a {}-register window (max {})",
                        device_type, window.count, MAX_READ_REGISTERS
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_consistent() {
        let catalog = RegisterCatalog::builtin();
        catalog.validate().unwrap();

        let types: Vec<_> = catalog.device_types().collect();
        assert_eq!(types, vec!["acpower", "bs600", "k24", "sui-201"]);
    }

    #[test]
    fn test_points_for_keeps_table_order() {
        let catalog = RegisterCatalog::builtin();
        let codes: Vec<_> = catalog
            .points_for("k24")
            .iter()
            .map(|p| p.code.as_str())
            .collect();
        assert_eq!(codes, vec!["Total flow", "Avg flow rate", "Flow rate"]);
    }

    #[test]
    fn test_unknown_type_is_empty() {
        let catalog = RegisterCatalog::builtin();
        assert!(catalog.points_for("unknown").is_empty());
        assert!(!catalog.contains_type("unknown"));
        assert!(catalog.find("unknown", "Voltage").is_none());
    }

    #[test]
    fn test_find_by_type_and_code() {
        let catalog = RegisterCatalog::builtin();
        let point = catalog.find("sui-201", "Voltage").unwrap();
        assert_eq!(point.address, 0x0BB8);
        assert_eq!(point.data_type, DataType::Int32);
        assert_eq!(point.unit, "V");

        let point = catalog.find("acpower", "Voltage").unwrap();
        assert_eq!(point.address, 0x0004);
        assert_eq!(point.word_count, 1);
    }

    #[test]
    fn test_window_covers_all_points() {
        let catalog = RegisterCatalog::builtin();

        let k24 = RegisterCatalog::window_for(catalog.points_for("k24")).unwrap();
        assert_eq!(k24, RegisterWindow { start: 0x0009, count: 0x0019 - 0x0009 });

        let acpower = RegisterCatalog::window_for(catalog.points_for("acpower")).unwrap();
        assert_eq!(acpower, RegisterWindow { start: 0, count: 6 });

        let sui = RegisterCatalog::window_for(catalog.points_for("sui-201")).unwrap();
        assert_eq!(sui, RegisterWindow { start: 0x0BB8, count: 8 });

        let point = catalog.find("sui-201", "Power").unwrap();
        assert_eq!(sui.offset_of(point), 4);

        assert!(RegisterCatalog::window_for(&[]).is_none());
    }

    #[test]
    fn test_validate_rejects_duplicate_code() {
        let catalog = RegisterCatalog::new(vec![
            RegisterPoint::new("meter", "flow", 0, DataType::Int32, 1.0, "L"),
            RegisterPoint::new("meter", "flow", 2, DataType::Int32, 1.0, "L"),
        ]);
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_word_count_mismatch() {
        let mut point = RegisterPoint::new("meter", "flow", 0, DataType::Float, 1.0, "L");
        point.word_count = 1;
        assert!(RegisterCatalog::new(vec![point]).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_window() {
        let catalog = RegisterCatalog::new(vec![
            RegisterPoint::new("meter", "a", 0, DataType::Uint16, 1.0, ""),
            RegisterPoint::new("meter", "b", 200, DataType::Uint16, 1.0, ""),
        ]);
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_data_type_parse() {
        assert_eq!("float_swap".parse::<DataType>().unwrap(), DataType::FloatSwap);
        assert_eq!("INT32_SWAP".parse::<DataType>().unwrap(), DataType::Int32Swap);
        assert!("INT64".parse::<DataType>().is_err());
        assert_eq!(DataType::Uint32Swap.to_string(), "UINT32_SWAP");
    }
}
