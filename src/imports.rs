//! Enumeration of the DLL names referenced by the import and delay-import directories

use crate::image::MappedImage;
use crate::pe::{
    read_c_string, ImageDelayloadDescriptor, Machine, IMAGE_IMPORT_DESCRIPTOR,
    IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT, IMAGE_DIRECTORY_ENTRY_IMPORT,
};
use crate::sections::SectionTranslator;
use dataview::DataView;
use std::iter::FusedIterator;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImportKind {
    /// Loaded together with the importing module
    Normal,
    /// Loaded on first use
    Delayed,
}

impl ImportKind {
    fn directory_entry(self) -> usize {
        match self {
            ImportKind::Normal => IMAGE_DIRECTORY_ENTRY_IMPORT,
            ImportKind::Delayed => IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT,
        }
    }

    fn descriptor_size(self) -> usize {
        match self {
            ImportKind::Normal => std::mem::size_of::<IMAGE_IMPORT_DESCRIPTOR>(),
            ImportKind::Delayed => std::mem::size_of::<ImageDelayloadDescriptor>(),
        }
    }

    /// Name RVA of the descriptor at `offset`; 0 terminates the descriptor array
    fn read_name_rva(self, view: &DataView, offset: usize) -> Option<u32> {
        match self {
            ImportKind::Normal => view
                .try_read::<IMAGE_IMPORT_DESCRIPTOR>(offset)
                .map(|d| d.Name),
            ImportKind::Delayed => view
                .try_read::<ImageDelayloadDescriptor>(offset)
                .map(|d| d.dll_name_rva),
        }
    }
}

/// Lazy walk over one descriptor array, yielding the imported DLL names in table order
///
/// Stops at the terminating descriptor, and at the first descriptor or name that cannot be
/// read from the mapped file.
pub struct ImportNames<'a> {
    bytes: &'a [u8],
    translator: &'a SectionTranslator,
    kind: ImportKind,
    next_descriptor: Option<usize>,
}

impl<'a> ImportNames<'a> {
    pub fn new(
        image: &'a MappedImage,
        translator: &'a SectionTranslator,
        arch: Machine,
        kind: ImportKind,
    ) -> Self {
        let bytes = image.bytes();
        let next_descriptor = image
            .headers()
            .data_directory(bytes, arch, kind.directory_entry())
            .filter(|dir| dir.Size > 0 && dir.VirtualAddress != 0)
            .and_then(|dir| {
                let offset = translator.translate(dir.VirtualAddress);
                if offset.is_none() {
                    log::debug!(
                        "{:?} import directory of {} at {:#x} is not mapped",
                        kind,
                        image.module_name(),
                        dir.VirtualAddress
                    );
                }
                offset
            });
        Self {
            bytes,
            translator,
            kind,
            next_descriptor,
        }
    }

    fn stop(&mut self) -> Option<&'a str> {
        self.next_descriptor = None;
        None
    }
}

impl<'a> Iterator for ImportNames<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next_descriptor?;
        let name_rva = match self.kind.read_name_rva(DataView::from(self.bytes), offset) {
            Some(0) => return self.stop(),
            Some(rva) => rva,
            None => {
                log::debug!("truncated {:?} import descriptor at {:#x}", self.kind, offset);
                return self.stop();
            }
        };
        let name = match self
            .translator
            .translate(name_rva)
            .and_then(|name_offset| read_c_string(self.bytes, name_offset))
        {
            Some(name) => name,
            None => {
                log::debug!("unreadable DLL name at {:#x}", name_rva);
                return self.stop();
            }
        };
        self.next_descriptor = Some(offset + self.kind.descriptor_size());
        Some(name)
    }
}

impl FusedIterator for ImportNames<'_> {}

/// Names of all the DLLs the image depends on: normal imports first, then delay imports
pub fn dependency_names<'a>(
    image: &'a MappedImage,
    translator: &'a SectionTranslator,
    arch: Machine,
) -> impl Iterator<Item = &'a str> + 'a {
    ImportNames::new(image, translator, arch, ImportKind::Normal).chain(ImportNames::new(
        image,
        translator,
        arch,
        ImportKind::Delayed,
    ))
}
