//! Test fixtures: synthesized PE images and an in-memory image access service

use crate::common::LookupError;
use crate::image::{ImageAccess, MappedImage};
use crate::pe::{
    Machine, IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT, IMAGE_DIRECTORY_ENTRY_IMPORT,
    IMAGE_NT_OPTIONAL_HDR32_MAGIC, IMAGE_NT_OPTIONAL_HDR64_MAGIC,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const NT_HEADERS_OFFSET: usize = 0x40;
const SECTION_FILE_OFFSET: usize = 0x200;
const SECTION_RVA: u32 = 0x1000;
const IMPORT_DESCRIPTOR_SIZE: usize = 20;
const DELAY_DESCRIPTOR_SIZE: usize = 32;

/// Writes a minimal PE image with a single `.idata` section holding the import descriptors,
/// the delay-import descriptors and the DLL name strings
pub struct PeBuilder {
    machine: Machine,
    imports: Vec<String>,
    delay_imports: Vec<String>,
    raw_pointer: Option<u32>,
    import_directory: Option<(u32, u32)>,
    delay_import_directory: Option<(u32, u32)>,
    number_of_rva_and_sizes: u32,
}

impl PeBuilder {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            imports: Vec::new(),
            delay_imports: Vec::new(),
            raw_pointer: None,
            import_directory: None,
            delay_import_directory: None,
            number_of_rva_and_sizes: 16,
        }
    }

    pub fn import(mut self, dll: &str) -> Self {
        self.imports.push(dll.to_owned());
        self
    }

    pub fn delay_import(mut self, dll: &str) -> Self {
        self.delay_imports.push(dll.to_owned());
        self
    }

    /// Override PointerToRawData of the section (0 makes it purely virtual)
    pub fn raw_pointer(mut self, pointer: u32) -> Self {
        self.raw_pointer = Some(pointer);
        self
    }

    /// Override the import data directory entry
    pub fn import_directory(mut self, virtual_address: u32, size: u32) -> Self {
        self.import_directory = Some((virtual_address, size));
        self
    }

    /// Override the delay-import data directory entry
    pub fn delay_import_directory(mut self, virtual_address: u32, size: u32) -> Self {
        self.delay_import_directory = Some((virtual_address, size));
        self
    }

    pub fn number_of_rva_and_sizes(mut self, count: u32) -> Self {
        self.number_of_rva_and_sizes = count;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let imports_len = if self.imports.is_empty() {
            0
        } else {
            (self.imports.len() + 1) * IMPORT_DESCRIPTOR_SIZE
        };
        let delay_len = if self.delay_imports.is_empty() {
            0
        } else {
            (self.delay_imports.len() + 1) * DELAY_DESCRIPTOR_SIZE
        };

        let mut section = vec![0u8; imports_len + delay_len];
        for (i, dll) in self.imports.iter().enumerate() {
            let rva = name_rva(&mut section, dll);
            put_u32(&mut section, i * IMPORT_DESCRIPTOR_SIZE + 12, rva);
        }
        for (i, dll) in self.delay_imports.iter().enumerate() {
            let rva = name_rva(&mut section, dll);
            // attributes: RVA based
            put_u32(&mut section, imports_len + i * DELAY_DESCRIPTOR_SIZE, 1);
            put_u32(&mut section, imports_len + i * DELAY_DESCRIPTOR_SIZE + 4, rva);
        }
        let virtual_size = section.len().max(1) as u32;
        let raw_size = align(section.len().max(1), 0x200);
        section.resize(raw_size, 0);

        let import_directory = self.import_directory.unwrap_or(if imports_len > 0 {
            (SECTION_RVA, imports_len as u32)
        } else {
            (0, 0)
        });
        let delay_import_directory = self.delay_import_directory.unwrap_or(if delay_len > 0 {
            (SECTION_RVA + imports_len as u32, delay_len as u32)
        } else {
            (0, 0)
        });

        let pe32 = self.machine.uses_pe32_layout();
        let optional_header_size: usize = if pe32 { 224 } else { 240 };
        let mut image = vec![0u8; SECTION_FILE_OFFSET];
        put_u16(&mut image, 0, 0x5a4d);
        put_u32(&mut image, 0x3c, NT_HEADERS_OFFSET as u32);
        image[NT_HEADERS_OFFSET..NT_HEADERS_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let file_header = NT_HEADERS_OFFSET + 4;
        put_u16(&mut image, file_header, self.machine.0);
        put_u16(&mut image, file_header + 2, 1);
        put_u16(&mut image, file_header + 16, optional_header_size as u16);
        put_u16(&mut image, file_header + 18, 0x2102);

        let optional_header = file_header + 20;
        let (magic, count_offset, directory_offset) = if pe32 {
            (IMAGE_NT_OPTIONAL_HDR32_MAGIC, 92, 96)
        } else {
            (IMAGE_NT_OPTIONAL_HDR64_MAGIC, 108, 112)
        };
        put_u16(&mut image, optional_header, magic);
        put_u32(
            &mut image,
            optional_header + count_offset,
            self.number_of_rva_and_sizes,
        );
        for (entry, (va, size)) in [
            (IMAGE_DIRECTORY_ENTRY_IMPORT, import_directory),
            (IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT, delay_import_directory),
        ] {
            let at = optional_header + directory_offset + entry * 8;
            put_u32(&mut image, at, va);
            put_u32(&mut image, at + 4, size);
        }

        let section_header = optional_header + optional_header_size;
        image[section_header..section_header + 6].copy_from_slice(b".idata");
        put_u32(&mut image, section_header + 8, virtual_size);
        put_u32(&mut image, section_header + 12, SECTION_RVA);
        put_u32(&mut image, section_header + 16, raw_size as u32);
        put_u32(
            &mut image,
            section_header + 20,
            self.raw_pointer.unwrap_or(SECTION_FILE_OFFSET as u32),
        );
        put_u32(&mut image, section_header + 36, 0xc000_0040);

        image.extend_from_slice(&section);
        image
    }
}

fn name_rva(section: &mut Vec<u8>, name: &str) -> u32 {
    let rva = SECTION_RVA + section.len() as u32;
    section.extend_from_slice(name.as_bytes());
    section.push(0);
    rva
}

fn align(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Image access over an in-memory set of directories, recording every mapping
#[derive(Default)]
pub struct MemoryImageAccess {
    directories: HashMap<PathBuf, Vec<(String, Vec<u8>)>>,
    /// (requested name, directory) of every lookup attempt, in order
    pub attempts: Vec<(String, PathBuf)>,
    /// (module name, directory) of every successful mapping, in order
    pub loads: Vec<(String, PathBuf)>,
    pub releases: usize,
    pub open: usize,
    pub peak_open: usize,
}

impl MemoryImageAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<P: AsRef<Path>>(&mut self, directory: P, file_name: &str, bytes: Vec<u8>) {
        self.directories
            .entry(directory.as_ref().to_owned())
            .or_default()
            .push((file_name.to_owned(), bytes));
    }

    /// Number of successful mappings of the given module, over all directories
    pub fn load_count(&self, module_name: &str) -> usize {
        self.loads
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(module_name))
            .count()
    }

    /// Number of lookups of the given requested name, over all directories
    pub fn attempt_count(&self, module_name: &str) -> usize {
        self.attempts
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(module_name))
            .count()
    }
}

impl ImageAccess for MemoryImageAccess {
    fn try_load(
        &mut self,
        module_name: &str,
        directory: &Path,
    ) -> Result<MappedImage, LookupError> {
        self.attempts
            .push((module_name.to_owned(), directory.to_owned()));
        let (file_name, bytes) = self
            .directories
            .get(directory)
            .and_then(|files| {
                files
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(module_name))
            })
            .ok_or_else(|| {
                LookupError::ScanError(format!("{} not in {:?}", module_name, directory))
            })?;
        let image = MappedImage::from_buffer(file_name, directory.join(file_name), bytes.clone())?;
        self.loads.push((file_name.clone(), directory.to_owned()));
        self.open += 1;
        self.peak_open = self.peak_open.max(self.open);
        Ok(image)
    }

    fn release(&mut self, image: MappedImage) {
        self.open -= 1;
        self.releases += 1;
        drop(image);
    }
}
