//! Capability probing from the HID report descriptor.
//!
//! Devices differ in which report IDs they accept as output reports and which
//! as feature reports. We walk the descriptor's items once after opening and
//! record, for each Output and Feature main item, the report ID in effect.
//! Input and Output items also add their bits to the size of their report.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::hidpp::{ReportKind, ReportSize};

const ITEM_TYPE_MAIN: u8 = 0;
const ITEM_TYPE_GLOBAL: u8 = 1;

const MAIN_TAG_INPUT: u8 = 0x8;
const MAIN_TAG_OUTPUT: u8 = 0x9;
const MAIN_TAG_FEATURE: u8 = 0xB;

const GLOBAL_TAG_REPORT_SIZE: u8 = 0x7;
const GLOBAL_TAG_REPORT_ID: u8 = 0x8;
const GLOBAL_TAG_REPORT_COUNT: u8 = 0x9;
const GLOBAL_TAG_PUSH: u8 = 0xA;
const GLOBAL_TAG_POP: u8 = 0xB;

const LONG_ITEM_PREFIX: u8 = 0xFE;

/// Report IDs the device declares as output- and feature-addressable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    pub output: BTreeSet<u8>,
    pub feature: BTreeSet<u8>,
    /// Largest input report in bytes, report ID byte included.
    pub max_input_report_size: Option<u16>,
    /// Largest output report in bytes, report ID byte included.
    pub max_output_report_size: Option<u16>,
}

impl CapabilitySet {
    /// Whether `size` frames may be sent as `kind` reports.
    pub fn supports(&self, kind: ReportKind, size: ReportSize) -> bool {
        let ids = match kind {
            ReportKind::Output => &self.output,
            ReportKind::Feature => &self.feature,
        };
        ids.contains(&size.report_id())
    }

    /// Whether any kind can carry `size` frames.
    pub fn supports_size(&self, size: ReportSize) -> bool {
        self.supports(ReportKind::Output, size) || self.supports(ReportKind::Feature, size)
    }
}

/// Global item state that Push and Pop save and restore.
#[derive(Debug, Clone, Copy, Default)]
struct Globals {
    report_id: u8,
    report_size: u32,
    report_count: u32,
}

impl Globals {
    fn field_bits(&self) -> u32 {
        self.report_size.saturating_mul(self.report_count)
    }
}

/// Walk a raw report descriptor and collect its capability set.
///
/// Truncated descriptors are read up to the last complete item.
pub fn probe_capabilities(descriptor: &[u8]) -> CapabilitySet {
    let mut caps = CapabilitySet::default();
    let mut globals = Globals::default();
    let mut stack: Vec<Globals> = Vec::new();
    let mut input_bits: BTreeMap<u8, u32> = BTreeMap::new();
    let mut output_bits: BTreeMap<u8, u32> = BTreeMap::new();
    let mut pos = 0;

    while pos < descriptor.len() {
        let prefix = descriptor[pos];

        if prefix == LONG_ITEM_PREFIX {
            let Some(&data_len) = descriptor.get(pos + 1) else {
                break;
            };
            pos += 3 + usize::from(data_len);
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => usize::from(n),
        };
        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;

        let Some(data) = descriptor.get(pos + 1..pos + 1 + size) else {
            break;
        };
        pos += 1 + size;

        match (item_type, tag) {
            (ITEM_TYPE_GLOBAL, GLOBAL_TAG_REPORT_ID) => {
                globals.report_id = data.first().copied().unwrap_or(0);
            }
            (ITEM_TYPE_GLOBAL, GLOBAL_TAG_REPORT_SIZE) => globals.report_size = unsigned(data),
            (ITEM_TYPE_GLOBAL, GLOBAL_TAG_REPORT_COUNT) => globals.report_count = unsigned(data),
            (ITEM_TYPE_GLOBAL, GLOBAL_TAG_PUSH) => stack.push(globals),
            (ITEM_TYPE_GLOBAL, GLOBAL_TAG_POP) => {
                globals = stack.pop().unwrap_or(globals);
            }
            (ITEM_TYPE_MAIN, MAIN_TAG_INPUT) => {
                add_bits(&mut input_bits, &globals);
            }
            (ITEM_TYPE_MAIN, MAIN_TAG_OUTPUT) => {
                caps.output.insert(globals.report_id);
                add_bits(&mut output_bits, &globals);
            }
            (ITEM_TYPE_MAIN, MAIN_TAG_FEATURE) => {
                caps.feature.insert(globals.report_id);
            }
            _ => {}
        }
    }

    caps.max_input_report_size = largest_report(&input_bits);
    caps.max_output_report_size = largest_report(&output_bits);
    caps
}

/// Little-endian unsigned item data.
fn unsigned(data: &[u8]) -> u32 {
    data.iter()
        .rev()
        .fold(0, |acc, &b| (acc << 8) | u32::from(b))
}

fn add_bits(reports: &mut BTreeMap<u8, u32>, globals: &Globals) {
    let bits = reports.entry(globals.report_id).or_default();
    *bits = bits.saturating_add(globals.field_bits());
}

/// Byte length of the largest report; a nonzero report ID adds its own byte.
fn largest_report(reports: &BTreeMap<u8, u32>) -> Option<u16> {
    reports
        .iter()
        .map(|(&id, &bits)| bits.div_ceil(8) + u32::from(id != 0))
        .max()
        .map(|bytes| u16::try_from(bytes).unwrap_or(u16::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Vendor collection as declared by a wired G-series receiver interface.
    const HIDPP_OUTPUT_DESCRIPTOR: &[u8] = &[
        0x06, 0x00, 0xFF, // Usage Page (Vendor 0xFF00)
        0x09, 0x01, //       Usage (1)
        0xA1, 0x01, //       Collection (Application)
        0x85, 0x10, //         Report ID (0x10)
        0x75, 0x08, //         Report Size (8)
        0x95, 0x06, //         Report Count (6)
        0x15, 0x00, //         Logical Minimum (0)
        0x26, 0xFF, 0x00, //   Logical Maximum (255)
        0x09, 0x01, //         Usage (1)
        0x81, 0x00, //         Input
        0x09, 0x01, //         Usage (1)
        0x91, 0x00, //         Output
        0xC0, //             End Collection
        0xA1, 0x01, //       Collection (Application)
        0x85, 0x11, //         Report ID (0x11)
        0x95, 0x13, //         Report Count (19)
        0x09, 0x02, //         Usage (2)
        0x81, 0x00, //         Input
        0x09, 0x02, //         Usage (2)
        0x91, 0x00, //         Output
        0xC0, //             End Collection
    ];

    #[test]
    fn classifies_output_reports() {
        let caps = probe_capabilities(HIDPP_OUTPUT_DESCRIPTOR);
        assert_eq!(caps.output, BTreeSet::from([0x10, 0x11]));
        assert!(caps.feature.is_empty());
        assert!(caps.supports(ReportKind::Output, ReportSize::Short));
        assert!(caps.supports(ReportKind::Output, ReportSize::Long));
        assert!(!caps.supports(ReportKind::Feature, ReportSize::Short));
    }

    #[test]
    fn classifies_feature_reports() {
        let descriptor = [
            0x85, 0x10, // Report ID (0x10)
            0xB1, 0x02, // Feature
            0x85, 0x20, // Report ID (0x20)
            0x91, 0x02, // Output
        ];
        let caps = probe_capabilities(&descriptor);
        assert_eq!(caps.feature, BTreeSet::from([0x10]));
        assert_eq!(caps.output, BTreeSet::from([0x20]));
        assert!(caps.supports(ReportKind::Feature, ReportSize::Short));
        assert!(!caps.supports_size(ReportSize::Long));
    }

    #[test]
    fn push_pop_restores_report_id() {
        let descriptor = [
            0x85, 0x10, // Report ID (0x10)
            0xA4, //       Push
            0x85, 0x11, // Report ID (0x11)
            0xB1, 0x02, // Feature -> 0x11
            0xB4, //       Pop
            0x91, 0x02, // Output -> 0x10
        ];
        let caps = probe_capabilities(&descriptor);
        assert_eq!(caps.feature, BTreeSet::from([0x11]));
        assert_eq!(caps.output, BTreeSet::from([0x10]));
    }

    #[test]
    fn skips_long_items() {
        let descriptor = [
            0xFE, 0x02, 0x10, 0x85, 0x11, // long item whose data looks like a Report ID
            0x85, 0x10, // Report ID (0x10)
            0x91, 0x02, // Output
        ];
        let caps = probe_capabilities(&descriptor);
        assert_eq!(caps.output, BTreeSet::from([0x10]));
    }

    #[test]
    fn four_byte_items_are_sized_correctly() {
        let descriptor = [
            0x27, 0xFF, 0xFF, 0x00, 0x00, // Logical Maximum (65535), 4-byte data
            0x85, 0x11, // Report ID (0x11)
            0xB1, 0x02, // Feature
        ];
        let caps = probe_capabilities(&descriptor);
        assert_eq!(caps.feature, BTreeSet::from([0x11]));
    }

    #[test]
    fn truncated_descriptor_stops_cleanly() {
        let descriptor = [0x85, 0x10, 0x91, 0x02, 0x85];
        let caps = probe_capabilities(&descriptor);
        assert_eq!(caps.output, BTreeSet::from([0x10]));
        assert_eq!(probe_capabilities(&[]), CapabilitySet::default());
    }

    #[test]
    fn measures_largest_input_and_output_reports() {
        let caps = probe_capabilities(HIDPP_OUTPUT_DESCRIPTOR);
        // 19 data bytes plus the report ID
        assert_eq!(caps.max_input_report_size, Some(20));
        assert_eq!(caps.max_output_report_size, Some(20));
    }

    #[test]
    fn report_sizes_sum_fields_and_follow_push_pop() {
        let descriptor = [
            0x05, 0x01, //       Usage Page (Generic Desktop)
            0x75, 0x01, //       Report Size (1)
            0x95, 0x05, //       Report Count (5)
            0x81, 0x02, //       Input: 5 button bits
            0x75, 0x03, //       Report Size (3)
            0x95, 0x01, //       Report Count (1)
            0x81, 0x01, //       Input: padding
            0xA4, //             Push
            0x85, 0x10, //       Report ID (0x10)
            0x75, 0x08, //       Report Size (8)
            0x96, 0x00, 0x01, // Report Count (256), 2-byte data
            0x91, 0x02, //       Output
            0xB4, //             Pop
            0x75, 0x10, //       Report Size (16)
            0x95, 0x02, //       Report Count (2)
            0x81, 0x06, //       Input: X, Y
        ];
        let caps = probe_capabilities(&descriptor);
        // 5 + 3 + 32 bits without a report ID
        assert_eq!(caps.max_input_report_size, Some(5));
        assert_eq!(caps.max_output_report_size, Some(257));
        assert_eq!(caps.output, BTreeSet::from([0x10]));
    }

    #[test]
    fn no_main_items_means_unknown_sizes() {
        let caps = probe_capabilities(&[0x85, 0x10, 0x75, 0x08]);
        assert_eq!(caps.max_input_report_size, None);
        assert_eq!(caps.max_output_report_size, None);
    }

    #[test]
    fn reports_without_id_use_zero() {
        let caps = probe_capabilities(&[0x91, 0x02]);
        assert_eq!(caps.output, BTreeSet::from([0x00]));
    }
}
