//! Translation of relative virtual addresses into offsets of the mapped file

use crate::pe::IMAGE_SECTION_HEADER;

#[derive(Debug, Clone, Copy)]
struct SectionRange {
    start: u64,
    end: u64,
    /// None for sections without file backing
    raw_data: Option<u64>,
}

/// Lookup table built from the section table of a mapped image
#[derive(Debug, Clone)]
pub struct SectionTranslator {
    sections: Vec<SectionRange>,
}

impl SectionTranslator {
    pub fn new(sections: &[IMAGE_SECTION_HEADER]) -> Self {
        Self {
            sections: sections
                .iter()
                .map(|s| SectionRange {
                    start: s.VirtualAddress as u64,
                    end: s.VirtualAddress as u64 + s.VirtualSize as u64,
                    raw_data: match s.PointerToRawData {
                        0 => None,
                        p => Some(p as u64),
                    },
                })
                .collect(),
        }
    }

    /// File offset corresponding to `rva`, if a file-backed section contains it
    ///
    /// A section covers `[VirtualAddress, VirtualAddress + VirtualSize]`, upper bound included.
    /// The first matching section in table order wins.
    pub fn translate(&self, rva: u32) -> Option<usize> {
        let rva = rva as u64;
        self.sections.iter().find_map(|s| match s.raw_data {
            Some(raw) if (s.start..=s.end).contains(&rva) => {
                usize::try_from(raw + rva - s.start).ok()
            }
            _ => None,
        })
    }
}
