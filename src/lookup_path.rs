use crate::common::LookupError;
use crate::system::WindowsSystem;
use fs_err as fs;
use std::path::{Path, PathBuf};

/// Directory to be searched, and the reason it is on the search path
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum LookupPathEntry {
    /// Directory where the root executable sits
    ExecutableDir(PathBuf),
    /// Windows System directory (typically C:\Windows\System32)
    SystemDir(PathBuf),
    /// Windows directory (typically C:\Windows)
    WindowsDir(PathBuf),
    /// Working directory of the (virtual) process whose DLL lookup we are simulating
    WorkingDir(PathBuf),
    /// PATH as specified by the system (value of the PATH variable of the current shell)
    SystemPath(PathBuf),
    /// Additional entries specified by the user
    UserPath(PathBuf),
}

impl LookupPathEntry {
    pub fn get_path(&self) -> &Path {
        match self {
            Self::ExecutableDir(p)
            | Self::SystemDir(p)
            | Self::WindowsDir(p)
            | Self::WorkingDir(p)
            | Self::SystemPath(p)
            | Self::UserPath(p) => p,
        }
    }
}

/// The executable to analyze, and the directories the user associates with it
#[derive(Clone, Debug)]
pub struct LookupTarget {
    pub target_exe: PathBuf,
    /// Parent directory of target_exe
    pub app_dir: PathBuf,
    /// Working directory as it should appear in the search path
    pub working_dir: PathBuf,
    /// Additional search path set by the user
    pub user_path: Vec<PathBuf>,
}

impl LookupTarget {
    /// The working directory is assumed to be the one containing the executable
    pub fn deduce_from_executable_location<P: AsRef<Path>>(
        target_exe: P,
    ) -> Result<Self, LookupError> {
        let target_exe = fs::canonicalize(target_exe.as_ref())?;
        let app_dir = target_exe
            .parent()
            .ok_or_else(|| {
                LookupError::ContextDeductionError(format!(
                    "Could not find application directory for given executable {}",
                    target_exe.display()
                ))
            })?
            .to_owned();
        Ok(Self {
            working_dir: app_dir.clone(),
            app_dir,
            target_exe,
            user_path: Vec::new(),
        })
    }

    /// File name of the target, as the root of the dependency tree is requested
    pub fn module_name(&self) -> Result<String, LookupError> {
        self.target_exe
            .file_name()
            .and_then(|f| f.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                LookupError::ContextDeductionError(format!(
                    "Invalid executable file name {}",
                    self.target_exe.display()
                ))
            })
    }
}

/// Sorted list of directories to be looked up when searching for a DLL
#[derive(Debug, Clone, Default)]
pub struct LookupPath {
    pub entries: Vec<LookupPathEntry>,
}

impl LookupPath {
    /// Standard (safe) search order for desktop applications
    ///
    /// https://docs.microsoft.com/en-us/windows/win32/dlls/dynamic-link-library-search-order
    pub fn deduce(target: &LookupTarget, system: Option<&WindowsSystem>) -> Self {
        let mut entries = vec![LookupPathEntry::ExecutableDir(target.app_dir.clone())];
        if let Some(system) = system {
            entries.push(LookupPathEntry::SystemDir(system.sys_dir.clone()));
            // 16-bit system directory ignored
            entries.push(LookupPathEntry::WindowsDir(system.win_dir.clone()));
        }
        entries.push(LookupPathEntry::WorkingDir(target.working_dir.clone()));
        if let Some(system_path) = system.and_then(|s| s.system_path.as_ref()) {
            entries.extend(system_path.iter().cloned().map(LookupPathEntry::SystemPath));
        }
        entries.extend(Self::user_path_entries(target));
        Self { entries }
    }

    /// Only the directory of the executable, followed by the user path
    pub fn user_only(target: &LookupTarget) -> Self {
        let mut entries = vec![LookupPathEntry::ExecutableDir(target.app_dir.clone())];
        entries.extend(Self::user_path_entries(target));
        Self { entries }
    }

    fn user_path_entries(target: &LookupTarget) -> impl Iterator<Item = LookupPathEntry> + '_ {
        target
            .user_path
            .iter()
            .cloned()
            .map(LookupPathEntry::UserPath)
    }

    /// Parse an entry in a .dwp file
    fn dwp_string_to_context_entry(
        s: &str,
        target: &LookupTarget,
        system: Option<&WindowsSystem>,
    ) -> Result<Vec<LookupPathEntry>, LookupError> {
        match s {
            // handled by the OS loader, not by directory lookup
            "SxS" | "KnownDLLs" | "16BitSysDir" | "AppPath" => Ok(vec![]),
            "AppDir" => Ok(vec![LookupPathEntry::ExecutableDir(target.app_dir.clone())]),
            "32BitSysDir" => Ok(system
                .map(|s| vec![LookupPathEntry::SystemDir(s.sys_dir.clone())])
                .unwrap_or_default()),
            "OSDir" => Ok(system
                .map(|s| vec![LookupPathEntry::WindowsDir(s.win_dir.clone())])
                .unwrap_or_default()),
            "SysPath" => Ok(system
                .and_then(|s| s.system_path.as_ref())
                .map(|p| p.iter().cloned().map(LookupPathEntry::SystemPath).collect())
                .unwrap_or_default()),
            _ => match s.strip_prefix("UserDir ") {
                Some(dir) => Ok(vec![LookupPathEntry::UserPath(PathBuf::from(dir))]),
                None => Err(LookupError::ParseError(format!(
                    "Unknown key in dwp file: {}",
                    s
                ))),
            },
        }
    }

    /// Build a LookupPath from the content of a Dependency Walker .dwp file
    ///
    /// https://www.dependencywalker.com/help/html/path_files.htm
    pub fn from_dwp_file<P: AsRef<Path>>(
        dwp_path: P,
        target: &LookupTarget,
        system: Option<&WindowsSystem>,
    ) -> Result<Self, LookupError> {
        let content = fs::read_to_string(dwp_path.as_ref())?;
        Self::from_dwp_str(&content, target, system)
    }

    fn from_dwp_str(
        content: &str,
        target: &LookupTarget,
        system: Option<&WindowsSystem>,
    ) -> Result<Self, LookupError> {
        let comment_chars = [':', ';', '/', '\'', '#'];
        let entries_vecs = content
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.starts_with(comment_chars))
            .map(|e| Self::dwp_string_to_context_entry(e, target, system))
            .collect::<Result<Vec<Vec<LookupPathEntry>>, LookupError>>()?;
        Ok(Self {
            entries: entries_vecs.concat(),
        })
    }

    /// The directory of the executable is searched, so the root resolves to the target itself
    pub fn has_executable_dir(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, LookupPathEntry::ExecutableDir(_)))
    }

    /// Linearize into the directories to search, each at its first position only
    pub fn search_path(&self) -> Vec<PathBuf> {
        let mut ret: Vec<PathBuf> = Vec::new();
        for p in self.entries.iter().map(LookupPathEntry::get_path) {
            if !ret.iter().any(|r| r == p) {
                ret.push(p.to_owned());
            }
        }
        ret
    }
}
