#[cfg(windows)]
extern crate winapi;
use crate::common::LookupError;
use fs_err as fs;
use std::collections::HashMap;
#[cfg(windows)]
use std::ffi::OsString;
#[cfg(windows)]
use std::os::windows::ffi::OsStringExt;
use std::path::{Path, PathBuf};

/// Directories of a Windows installation that take part in DLL lookup
///
/// When running on Windows these come from the Windows API and the PATH environment variable.
/// On other systems we can only guess them from a mounted Windows partition, and there is no PATH.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WindowsSystem {
    pub win_dir: PathBuf,
    pub sys_dir: PathBuf,
    pub system_path: Option<Vec<PathBuf>>,
}

impl WindowsSystem {
    /// Collect information about the host operating system
    #[cfg(windows)]
    pub fn current() -> Result<Self, LookupError> {
        let win_dir = get_windows_directory()?;
        let sys_dir = get_system_directory()?;
        let system_path = std::env::var_os("PATH").map(|p| {
            std::env::split_paths(&p)
                .filter(|d| !d.as_os_str().is_empty())
                .filter_map(|d| fs::canonicalize(d).ok())
                .collect()
        });
        Ok(Self {
            win_dir,
            sys_dir,
            system_path,
        })
    }

    /// Find the Windows installation on the partition the target executable lies into
    pub fn from_exe_location<P: AsRef<Path>>(p: P) -> Option<Self> {
        p.as_ref()
            .parent()?
            .ancestors()
            .find_map(|a| Self::from_root(a))
    }

    /// Describe the Windows installation at the given partition root (the C:\ equivalent)
    pub fn from_root<P: AsRef<Path>>(root_path: P) -> Option<Self> {
        let win_dir = root_path.as_ref().join("Windows");
        let sys_dir = win_dir.join("System32");
        if sys_dir.is_dir() {
            Some(Self {
                win_dir,
                sys_dir,
                system_path: None,
            })
        } else {
            None
        }
    }
}

/// Fetch the path to a system directory through the Windows API
#[cfg(windows)]
fn get_winapi_directory(
    a: unsafe extern "system" fn(
        winapi::um::winnt::LPWSTR,
        winapi::shared::minwindef::UINT,
    ) -> winapi::shared::minwindef::UINT,
) -> Result<PathBuf, std::io::Error> {
    const BFR_SIZE: usize = 512;
    let mut bfr: [u16; BFR_SIZE] = [0; BFR_SIZE];

    let ret: u32 = unsafe { a(bfr.as_mut_ptr(), BFR_SIZE as u32) };
    if ret == 0 || ret as usize > BFR_SIZE {
        Err(std::io::Error::last_os_error())
    } else {
        fs::canonicalize(OsString::from_wide(&bfr[..ret as usize]))
    }
}

/// Get the path to the System directory (typically C:\Windows\System32)
#[cfg(windows)]
fn get_system_directory() -> Result<PathBuf, std::io::Error> {
    get_winapi_directory(winapi::um::sysinfoapi::GetSystemDirectoryW)
}

/// Get the path to the Windows directory (typically C:\Windows)
#[cfg(windows)]
fn get_windows_directory() -> Result<PathBuf, std::io::Error> {
    get_winapi_directory(winapi::um::sysinfoapi::GetWindowsDirectoryW)
}

/// Caches the listing of already scanned directories, since every module is looked up in
/// every directory of the search path until found
pub(crate) struct WinFileSystemCache {
    files_in_dirs: HashMap<PathBuf, HashMap<String, PathBuf>>,
}

impl WinFileSystemCache {
    pub(crate) fn new() -> Self {
        Self {
            files_in_dirs: HashMap::new(),
        }
    }

    /// Full path of the file in `folder` whose name matches `filename` ignoring case
    pub(crate) fn test_file_in_folder_case_insensitive<Q: AsRef<Path>>(
        &mut self,
        filename: &str,
        folder: Q,
    ) -> Result<Option<PathBuf>, LookupError> {
        let folder = folder.as_ref();
        let dir = match self.files_in_dirs.entry(folder.to_owned()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => e.insert(Self::scan_folder(folder)?),
        };
        Ok(dir
            .get(&filename.to_lowercase())
            .map(|actual_name| folder.join(actual_name)))
    }

    fn scan_folder(folder: &Path) -> Result<HashMap<String, PathBuf>, LookupError> {
        if !folder.is_dir() {
            return Err(LookupError::ScanError(format!(
                "Could not scan directory {:?}",
                folder
            )));
        }
        Ok(fs::read_dir(folder)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.metadata().map_or(false, |m| m.is_file()))
            .filter_map(|entry| {
                let name = entry.file_name();
                name.to_str()
                    .map(|s| (s.to_lowercase(), PathBuf::from(&name)))
            })
            .collect())
    }
}
