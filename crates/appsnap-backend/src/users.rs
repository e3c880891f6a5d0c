//! Resolving usernames to home directories.

use crate::error::{Result, SnapshotError};
use appsnap_config::DataLayout;
use std::ffi::{CStr, CString, OsStr};
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use tracing::debug;

/// A user whose data may be captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub username: String,
    pub home_dir: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

/// Source of user accounts.
pub trait UserLookup: Send + Sync {
    /// Look a user up by name; `Ok(None)` if no such user exists.
    fn lookup(&self, username: &str) -> Result<Option<UserEntry>>;

    /// Every user that has application data.
    fn all_users(&self) -> Result<Vec<UserEntry>>;

    /// Resolve a username filter; an empty filter means every user.
    ///
    /// Unknown names are skipped.
    fn users_for_usernames(&self, usernames: &[String]) -> Result<Vec<UserEntry>> {
        if usernames.is_empty() {
            return self.all_users();
        }
        let mut users = Vec::with_capacity(usernames.len());
        for name in usernames {
            match self.lookup(name)? {
                Some(user) => users.push(user),
                None => debug!(username = %name, "skipping unknown user"),
            }
        }
        Ok(users)
    }
}

/// Users from the system password database.
///
/// Homes are discovered under the layout's root, so a relocated root only
/// yields users with data inside it.
#[derive(Debug, Clone)]
pub struct SystemUsers {
    layout: DataLayout,
}

impl SystemUsers {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    fn candidate_homes(&self) -> Result<Vec<PathBuf>> {
        let mut homes = Vec::new();
        match fs::read_dir(self.layout.home_root()) {
            Ok(entries) => {
                for entry in entries {
                    homes.push(entry?.path());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        homes.sort();
        homes.push(self.layout.root_home());
        Ok(homes)
    }
}

impl UserLookup for SystemUsers {
    fn lookup(&self, username: &str) -> Result<Option<UserEntry>> {
        let name = CString::new(username).map_err(|e| SnapshotError::UserLookup {
            username: username.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;
        passwd_entry(PasswdQuery::Name(&name)).map_err(|source| SnapshotError::UserLookup {
            username: username.to_string(),
            source,
        })
    }

    fn all_users(&self) -> Result<Vec<UserEntry>> {
        let mut users = Vec::new();
        for home in self.candidate_homes()? {
            let apps = DataLayout::user_apps_dir(&home);
            let meta = match fs::metadata(&apps) {
                Ok(m) if m.is_dir() => m,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let uid = meta.uid();
            let found = passwd_entry(PasswdQuery::Uid(uid)).map_err(|source| {
                SnapshotError::UserLookup {
                    username: format!("#{}", uid),
                    source,
                }
            })?;
            match found {
                Some(mut user) => {
                    user.home_dir = home;
                    users.push(user);
                }
                None => debug!(uid, path = %apps.display(), "no user owns data directory"),
            }
        }
        Ok(users)
    }
}

enum PasswdQuery<'a> {
    Name(&'a CStr),
    Uid(u32),
}

const PASSWD_BUF_START: usize = 1024;
const PASSWD_BUF_MAX: usize = 1 << 20;

fn passwd_entry(query: PasswdQuery<'_>) -> io::Result<Option<UserEntry>> {
    let mut buf: Vec<libc::c_char> = vec![0; PASSWD_BUF_START];
    loop {
        // SAFETY: passwd is plain old data; getpw*_r fills it in.
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: every pointer refers to live storage of the stated length.
        let rc = unsafe {
            match query {
                PasswdQuery::Name(name) => libc::getpwnam_r(
                    name.as_ptr(),
                    &mut pwd,
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                ),
                PasswdQuery::Uid(uid) => {
                    libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result)
                }
            }
        };
        if rc == libc::ERANGE && buf.len() < PASSWD_BUF_MAX {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if result.is_null() {
            // Several libcs report "not found" through errno-style codes.
            return match rc {
                0 | libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM => Ok(None),
                code => Err(io::Error::from_raw_os_error(code)),
            };
        }
        // SAFETY: on success pw_name and pw_dir point into `buf`.
        let (name, home) = unsafe {
            (
                CStr::from_ptr(pwd.pw_name).to_string_lossy().into_owned(),
                PathBuf::from(OsStr::from_bytes(CStr::from_ptr(pwd.pw_dir).to_bytes())),
            )
        };
        return Ok(Some(UserEntry {
            username: name,
            home_dir: home,
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
        }));
    }
}
