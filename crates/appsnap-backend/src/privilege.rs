//! Running the archiver as the user who owns the data.
//!
//! When the process is elevated, user data is archived and extracted through
//! a wrapper (`runuser`, else `sudo`) so files are read and written with the
//! user's own permissions.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::info;

/// Wrapper programs tried in order.
const USER_WRAPPERS: [&str; 2] = ["runuser", "sudo"];

const ROOT_USER: &str = "root";

/// Look a program up on the command path.
pub type LookPath = Arc<dyn Fn(&str) -> Option<PathBuf> + Send + Sync>;

/// Report the effective uid of this process.
pub type EuidProbe = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Something that can build an archiver command line.
pub trait TarInvoker: fmt::Debug + Send + Sync {
    fn command(&self, args: &[OsString]) -> Command;
}

/// Run the archiver as the current process.
#[derive(Debug, Clone)]
pub struct DirectTar {
    tar: OsString,
}

impl DirectTar {
    pub fn new(tar: impl Into<OsString>) -> Self {
        Self { tar: tar.into() }
    }
}

impl TarInvoker for DirectTar {
    fn command(&self, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.tar);
        cmd.args(args);
        cmd
    }
}

/// Run the archiver through `<wrapper> -u <user> --`.
#[derive(Debug, Clone)]
pub struct WrappedTar {
    wrapper: PathBuf,
    username: String,
    tar: OsString,
}

impl WrappedTar {
    pub fn new(wrapper: PathBuf, username: impl Into<String>, tar: impl Into<OsString>) -> Self {
        Self {
            wrapper,
            username: username.into(),
            tar: tar.into(),
        }
    }
}

impl TarInvoker for WrappedTar {
    fn command(&self, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.wrapper);
        cmd.arg("-u")
            .arg(&self.username)
            .arg("--")
            .arg(&self.tar)
            .args(args);
        cmd
    }
}

/// Decides how the archiver is run for a given data owner.
#[derive(Clone)]
pub struct PrivilegeResolver {
    look_path: LookPath,
    euid: EuidProbe,
    tar_program: OsString,
}

impl Default for PrivilegeResolver {
    fn default() -> Self {
        Self::new(
            Arc::new(|name: &str| which::which(name).ok()),
            // SAFETY: geteuid has no preconditions and cannot fail.
            Arc::new(|| unsafe { libc::geteuid() }),
        )
    }
}

impl fmt::Debug for PrivilegeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivilegeResolver")
            .field("tar_program", &self.tar_program)
            .finish_non_exhaustive()
    }
}

impl PrivilegeResolver {
    pub fn new(look_path: LookPath, euid: EuidProbe) -> Self {
        Self {
            look_path,
            euid,
            tar_program: OsString::from("tar"),
        }
    }

    /// Use a different archiver binary.
    pub fn with_tar_program(mut self, tar: impl AsRef<OsStr>) -> Self {
        self.tar_program = tar.as_ref().to_os_string();
        self
    }

    pub fn tar_program(&self) -> &OsStr {
        &self.tar_program
    }

    /// Whether the process runs with an effective uid of 0.
    pub fn is_elevated(&self) -> bool {
        (self.euid)() == 0
    }

    /// Find a program that can run commands as another user.
    ///
    /// Resolved on every call; the first wrapper found wins.
    pub fn pick_user_wrapper(&self) -> Option<PathBuf> {
        USER_WRAPPERS.iter().find_map(|name| (self.look_path)(name))
    }

    /// Choose how to run the archiver for data owned by `username`.
    ///
    /// `None` means the system root, which is archived as the process itself.
    pub fn invoker_for(&self, username: Option<&str>) -> Box<dyn TarInvoker> {
        let direct = Box::new(DirectTar::new(self.tar_program.clone()));
        let username = match username {
            Some(u) if u != ROOT_USER => u,
            _ => return direct,
        };
        if !self.is_elevated() {
            return direct;
        }
        match self.pick_user_wrapper() {
            Some(wrapper) => Box::new(WrappedTar::new(
                wrapper,
                username,
                self.tar_program.clone(),
            )),
            None => {
                info!("No user wrapper found.");
                direct
            }
        }
    }

    /// Build the archiver command for data owned by `username`.
    pub fn tar_as_user<I, S>(&self, username: Option<&str>, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        self.invoker_for(username).command(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn argv(cmd: &Command) -> Vec<String> {
        std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    fn resolver(found: &'static [&'static str], euid: u32) -> (PrivilegeResolver, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let look_path: LookPath = Arc::new(move |name: &str| {
            seen.lock().unwrap().push(name.to_string());
            found
                .contains(&name)
                .then(|| PathBuf::from(format!("/usr/bin/{}", name)))
        });
        (PrivilegeResolver::new(look_path, Arc::new(move || euid)), calls)
    }

    #[test]
    fn test_pick_prefers_runuser() {
        let (r, calls) = resolver(&["runuser", "sudo"], 0);
        assert_eq!(r.pick_user_wrapper(), Some(PathBuf::from("/usr/bin/runuser")));
        assert_eq!(*calls.lock().unwrap(), vec!["runuser"]);
    }

    #[test]
    fn test_pick_falls_back_to_sudo() {
        let (r, calls) = resolver(&["sudo"], 0);
        assert_eq!(r.pick_user_wrapper(), Some(PathBuf::from("/usr/bin/sudo")));
        assert_eq!(*calls.lock().unwrap(), vec!["runuser", "sudo"]);
    }

    #[test]
    fn test_pick_none() {
        let (r, _) = resolver(&[], 0);
        assert_eq!(r.pick_user_wrapper(), None);
    }

    #[test]
    fn test_pick_resolves_every_call() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let r = PrivilegeResolver::new(
            Arc::new(move |_: &str| {
                c.fetch_add(1, Ordering::SeqCst);
                None
            }),
            Arc::new(|| 0),
        );
        r.pick_user_wrapper();
        r.pick_user_wrapper();
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_system_root_runs_direct() {
        let (r, calls) = resolver(&["runuser"], 0);
        let cmd = r.tar_as_user(None, ["--create"]);
        assert_eq!(argv(&cmd), vec!["tar", "--create"]);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_root_user_runs_direct() {
        let (r, _) = resolver(&["runuser"], 0);
        let cmd = r.tar_as_user(Some("root"), ["--create"]);
        assert_eq!(argv(&cmd), vec!["tar", "--create"]);
    }

    #[test]
    fn test_unprivileged_runs_direct() {
        let (r, calls) = resolver(&["runuser"], 1000);
        let cmd = r.tar_as_user(Some("alice"), ["--create"]);
        assert_eq!(argv(&cmd), vec!["tar", "--create"]);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_elevated_user_is_wrapped() {
        let (r, _) = resolver(&["runuser"], 0);
        let cmd = r.tar_as_user(Some("alice"), ["--create", "--gzip"]);
        assert_eq!(
            argv(&cmd),
            vec!["/usr/bin/runuser", "-u", "alice", "--", "tar", "--create", "--gzip"]
        );
    }

    #[test]
    fn test_elevated_without_wrapper_runs_direct() {
        let (r, _) = resolver(&[], 0);
        let cmd = r.tar_as_user(Some("alice"), ["--extract"]);
        assert_eq!(argv(&cmd), vec!["tar", "--extract"]);
    }

    #[test]
    fn test_custom_tar_program() {
        let (r, _) = resolver(&["sudo"], 0);
        let r = r.with_tar_program("/opt/bin/gtar");
        let cmd = r.tar_as_user(Some("alice"), ["-x"]);
        assert_eq!(
            argv(&cmd),
            vec!["/usr/bin/sudo", "-u", "alice", "--", "/opt/bin/gtar", "-x"]
        );
    }
}
