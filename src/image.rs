//! Image access service: locate a module in a directory, map it and validate its headers

use crate::common::LookupError;
use crate::pe::{Machine, PeHeaders, IMAGE_SECTION_HEADER};
use crate::system::WinFileSystemCache;
use std::path::{Path, PathBuf};

/// Backing storage of a mapped image
enum ImageData {
    /// Memory mapping and the length of the file; the mapping may be padded to a page boundary
    Mapped(pelite::FileMap, usize),
    Buffer(Vec<u8>),
}

impl AsRef<[u8]> for ImageData {
    fn as_ref(&self) -> &[u8] {
        match self {
            ImageData::Mapped(map, len) => {
                let bytes = map.as_ref();
                &bytes[..(*len).min(bytes.len())]
            }
            ImageData::Buffer(buf) => buf.as_slice(),
        }
    }
}

/// A module file mapped in memory (file layout), whose PE headers were validated
pub struct MappedImage {
    module_name: String,
    path: PathBuf,
    data: ImageData,
    headers: PeHeaders,
}

impl MappedImage {
    /// Map the file at `path` read-only
    pub fn open<P: AsRef<Path>>(module_name: &str, path: P) -> Result<Self, LookupError> {
        let len = usize::try_from(fs_err::metadata(path.as_ref())?.len()).map_err(|_| {
            LookupError::WrongFileFormat(format!("{} is too large", path.as_ref().display()))
        })?;
        let map = pelite::FileMap::open(path.as_ref())?;
        let data = ImageData::Mapped(map, len);
        let headers = PeHeaders::parse(data.as_ref())?;
        Ok(Self {
            module_name: module_name.to_owned(),
            path: path.as_ref().to_owned(),
            data,
            headers,
        })
    }

    /// Wrap an image already read into memory
    pub fn from_buffer<P: AsRef<Path>>(
        module_name: &str,
        path: P,
        bytes: Vec<u8>,
    ) -> Result<Self, LookupError> {
        let headers = PeHeaders::parse(&bytes)?;
        Ok(Self {
            module_name: module_name.to_owned(),
            path: path.as_ref().to_owned(),
            data: ImageData::Buffer(bytes),
            headers,
        })
    }

    /// File name of the module as found on disk
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn machine(&self) -> Machine {
        self.headers.machine()
    }

    pub fn sections(&self) -> &[IMAGE_SECTION_HEADER] {
        &self.headers.sections
    }

    pub fn headers(&self) -> &PeHeaders {
        &self.headers
    }

    /// Content of the file, without any padding of the mapping
    pub fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

/// Capability of mapping a module by name from a given directory
pub trait ImageAccess {
    /// Map `module_name` from `directory`; failures are expected for missing or non-PE files
    fn try_load(
        &mut self,
        module_name: &str,
        directory: &Path,
    ) -> Result<MappedImage, LookupError>;

    /// Give back an image obtained from `try_load`
    fn release(&mut self, image: MappedImage) {
        drop(image);
    }
}

/// Maps module files from the filesystem, matching file names case-insensitively
pub struct FileSystemImageAccess {
    fs_cache: WinFileSystemCache,
}

impl FileSystemImageAccess {
    pub fn new() -> Self {
        Self {
            fs_cache: WinFileSystemCache::new(),
        }
    }
}

impl Default for FileSystemImageAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageAccess for FileSystemImageAccess {
    fn try_load(
        &mut self,
        module_name: &str,
        directory: &Path,
    ) -> Result<MappedImage, LookupError> {
        let full_path = self
            .fs_cache
            .test_file_in_folder_case_insensitive(module_name, directory)?
            .ok_or_else(|| {
                LookupError::ScanError(format!("{} not found in {:?}", module_name, directory))
            })?;
        let file_name = full_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| module_name.to_owned());
        log::debug!("mapping {}", full_path.display());
        MappedImage::open(&file_name, &full_path)
    }

    fn release(&mut self, image: MappedImage) {
        log::debug!("unmapping {}", image.path().display());
        drop(image);
    }
}
