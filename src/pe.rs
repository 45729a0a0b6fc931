//! Low-level PE file format access: fixed header records read through bounds-checked views

use crate::common::LookupError;
use dataview::{DataView, Pod};
use serde::Serialize;
use std::fmt;

pub use pelite::image::{
    IMAGE_DATA_DIRECTORY, IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT, IMAGE_DIRECTORY_ENTRY_IMPORT,
    IMAGE_DOS_SIGNATURE, IMAGE_FILE_HEADER, IMAGE_IMPORT_DESCRIPTOR, IMAGE_NT_HEADERS_SIGNATURE,
    IMAGE_NT_OPTIONAL_HDR32_MAGIC, IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_SECTION_HEADER,
};

const DOS_E_LFANEW_OFFSET: usize = 0x3c;

// offsets inside the optional header
const PE32_NUMBER_OF_RVA_AND_SIZES: usize = 92;
const PE32_DATA_DIRECTORY: usize = 96;
const PE64_NUMBER_OF_RVA_AND_SIZES: usize = 108;
const PE64_DATA_DIRECTORY: usize = 112;

/// Target instruction set of an image (COFF file header `Machine` field)
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(transparent)]
pub struct Machine(pub u16);

impl Machine {
    pub const I386: Machine = Machine(0x014c);
    pub const AMD64: Machine = Machine(0x8664);
    pub const ARMNT: Machine = Machine(0x01c4);
    pub const ARM64: Machine = Machine(0xaa64);

    /// Images for this machine use the 32-bit optional header layout
    pub fn uses_pe32_layout(self) -> bool {
        self == Self::I386
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::I386 => write!(f, "x86"),
            Self::AMD64 => write!(f, "x64"),
            Self::ARMNT => write!(f, "ARM"),
            Self::ARM64 => write!(f, "ARM64"),
            Machine(m) => write!(f, "machine {:#06x}", m),
        }
    }
}

/// Delay-load descriptor, one per delay-imported DLL
#[derive(Copy, Clone, Debug, Pod)]
#[repr(C)]
pub struct ImageDelayloadDescriptor {
    pub attributes: u32,
    pub dll_name_rva: u32,
    pub module_handle_rva: u32,
    pub import_address_table_rva: u32,
    pub import_name_table_rva: u32,
    pub bound_import_address_table_rva: u32,
    pub unload_information_table_rva: u32,
    pub time_date_stamp: u32,
}

pub const SIZEOF_FILE_HEADER: usize = std::mem::size_of::<IMAGE_FILE_HEADER>();
pub const SIZEOF_SECTION_HEADER: usize = std::mem::size_of::<IMAGE_SECTION_HEADER>();

/// Headers of a validated PE image, as needed to walk its import tables
#[derive(Debug, Clone)]
pub struct PeHeaders {
    pub file_header: IMAGE_FILE_HEADER,
    pub optional_header_offset: usize,
    pub sections: Vec<IMAGE_SECTION_HEADER>,
}

impl PeHeaders {
    /// Validate the DOS and NT headers and read the section table
    pub fn parse(bytes: &[u8]) -> Result<Self, LookupError> {
        let view = DataView::from(bytes);

        let dos_magic = view.try_read::<u16>(0).ok_or_else(|| {
            LookupError::WrongFileFormat("file too small for a DOS header".to_owned())
        })?;
        if dos_magic != IMAGE_DOS_SIGNATURE {
            return Err(LookupError::WrongFileFormat("missing MZ signature".to_owned()));
        }

        let nt_offset = view
            .try_read::<u32>(DOS_E_LFANEW_OFFSET)
            .ok_or_else(|| LookupError::MalformedHeader("truncated DOS header".to_owned()))?
            as usize;
        let signature = view.try_read::<u32>(nt_offset).ok_or_else(|| {
            LookupError::MalformedHeader(format!("NT headers offset {:#x} out of range", nt_offset))
        })?;
        if signature != IMAGE_NT_HEADERS_SIGNATURE {
            return Err(LookupError::WrongFileFormat("missing PE signature".to_owned()));
        }

        let file_header_offset = nt_offset + 4;
        let file_header = view
            .try_read::<IMAGE_FILE_HEADER>(file_header_offset)
            .ok_or_else(|| LookupError::MalformedHeader("truncated file header".to_owned()))?;

        let optional_header_offset = file_header_offset + SIZEOF_FILE_HEADER;
        let optional_header_size = file_header.SizeOfOptionalHeader as usize;
        if optional_header_offset + optional_header_size > bytes.len() {
            return Err(LookupError::MalformedHeader(
                "truncated optional header".to_owned(),
            ));
        }

        let section_table_offset = optional_header_offset + optional_header_size;
        let sections = (0..file_header.NumberOfSections as usize)
            .map(|i| {
                view.try_read::<IMAGE_SECTION_HEADER>(section_table_offset + i * SIZEOF_SECTION_HEADER)
                    .ok_or_else(|| {
                        LookupError::MalformedHeader(format!("truncated section header {}", i))
                    })
            })
            .collect::<Result<Vec<_>, LookupError>>()?;

        Ok(Self {
            file_header,
            optional_header_offset,
            sections,
        })
    }

    pub fn machine(&self) -> Machine {
        Machine(self.file_header.Machine)
    }

    /// Read an entry of the optional header's data directory
    ///
    /// The 32-bit or 64-bit optional header layout is selected by `arch`. Entries beyond
    /// NumberOfRvaAndSizes, or not fitting the declared optional header size, are absent.
    pub fn data_directory(
        &self,
        bytes: &[u8],
        arch: Machine,
        entry: usize,
    ) -> Option<IMAGE_DATA_DIRECTORY> {
        let (count_offset, directory_offset) = if arch.uses_pe32_layout() {
            (PE32_NUMBER_OF_RVA_AND_SIZES, PE32_DATA_DIRECTORY)
        } else {
            (PE64_NUMBER_OF_RVA_AND_SIZES, PE64_DATA_DIRECTORY)
        };
        let entry_offset = directory_offset + entry * std::mem::size_of::<IMAGE_DATA_DIRECTORY>();
        let optional_header_size = self.file_header.SizeOfOptionalHeader as usize;
        if entry_offset + std::mem::size_of::<IMAGE_DATA_DIRECTORY>() > optional_header_size {
            return None;
        }

        let view = DataView::from(bytes);
        let count = view.try_read::<u32>(self.optional_header_offset + count_offset)?;
        if entry >= count as usize {
            return None;
        }
        view.try_read::<IMAGE_DATA_DIRECTORY>(self.optional_header_offset + entry_offset)
    }
}

/// Read a NUL-terminated string starting at `offset`
pub fn read_c_string(bytes: &[u8], offset: usize) -> Option<&str> {
    let tail = bytes.get(offset..)?;
    let len = tail.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&tail[..len]).ok()
}
