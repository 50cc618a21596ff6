//! Rendezvous addressing for a container group.
//!
//! Publishers, the monitor daemon and subscribers start independently and
//! find each other purely by recomputing the same two addresses from the
//! container-group identifier (usually the lxcpath, e.g. `/var/lib/lxc`):
//!
//! - the publish FIFO: `{runtime_root}/lxc/{group}/monitor-fifo`
//! - the abstract socket: `\0lxc/{fnv1a64("lxc/{group}/monitor-sock")}/{group}`
//!
//! The socket name must fit the 108-byte `sun_path` buffer. Hashing the full
//! candidate keeps names of long groups distinct while the literal group
//! suffix keeps the address recognizable in `ss -x` output and logs.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use lxcmon_core::rundir::mkdir_p;
use tracing::info;

use crate::error::AddressError;

/// FNV-1a 64-bit offset basis.
pub const FNV1A_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV 64-bit prime.
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Size of `sockaddr_un.sun_path` on Linux.
pub const SUN_PATH_CAPACITY: usize = 108;

/// Longest abstract name accepted, excluding the leading NUL sentinel.
///
/// Older subscribers reserve 3 bytes of `sun_path` (sentinel plus
/// termination), so names are capped at 105 bytes. Raising this would make
/// new and old processes on one host disagree on which groups are
/// addressable.
pub const MAX_SOCKET_NAME_LEN: usize = SUN_PATH_CAPACITY - 3;

/// Longest path the kernel accepts (including the terminating NUL).
pub const PATH_MAX: usize = 4096;

/// Mode used when creating the FIFO's parent directories.
const FIFO_DIR_MODE: u32 = 0o755;

/// File name of the publish FIFO inside the group's runtime directory.
const FIFO_NAME: &str = "monitor-fifo";

/// Computes the 64-bit FNV-1a hash of `bytes` starting from `init`.
pub fn fnv1a_64(bytes: &[u8], init: u64) -> u64 {
    bytes
        .iter()
        .fold(init, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_64_PRIME))
}

// ============================================================================
// Abstract socket name
// ============================================================================

/// Name of a group's monitor socket in the abstract namespace.
///
/// Holds the name without the leading NUL sentinel; the length is always
/// `<= MAX_SOCKET_NAME_LEN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketName(String);

impl SocketName {
    /// Derives the socket name for `group`.
    ///
    /// Fails with [`AddressError::TooLong`] when the hashed name cannot be
    /// represented. There is no truncation fallback.
    pub fn for_group(group: &str) -> Result<Self, AddressError> {
        let candidate = format!("lxc/{group}/monitor-sock");
        let hash = fnv1a_64(candidate.as_bytes(), FNV1A_64_INIT);
        let name = format!("lxc/{hash:016x}/{group}");

        if name.len() > MAX_SOCKET_NAME_LEN {
            return Err(AddressError::TooLong {
                group: group.to_string(),
                len: name.len(),
                max: MAX_SOCKET_NAME_LEN,
            });
        }

        info!(
            socket = %name,
            len = name.len(),
            max = MAX_SOCKET_NAME_LEN,
            "Using monitor socket name"
        );

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name bytes as passed to the kernel after the sentinel.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the full `sun_path` image: NUL sentinel, name, NUL padding.
    pub fn to_sun_path(&self) -> [u8; SUN_PATH_CAPACITY] {
        let mut sun_path = [0u8; SUN_PATH_CAPACITY];
        if let Some((sentinel, rest)) = sun_path.split_first_mut() {
            // Formatted as '@', then swapped for the sentinel once the
            // whole name is in place.
            *sentinel = b'@';
            for (dst, src) in rest.iter_mut().zip(self.as_bytes()) {
                *dst = *src;
            }
            *sentinel = 0;
        }
        sun_path
    }
}

impl fmt::Display for SocketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

// ============================================================================
// Publish FIFO
// ============================================================================

/// Returns the publish FIFO path for `group` below `runtime_root`.
///
/// With `create_dirs`, the FIFO's parent directory is created (mode 0755)
/// first; failure is reported, not retried. The group is appended
/// literally, so an absolute lxcpath yields a doubled slash exactly like
/// every other participant computes it.
pub fn fifo_path(
    runtime_root: &Path,
    group: &str,
    create_dirs: bool,
) -> Result<PathBuf, AddressError> {
    let mut dir = OsString::from(runtime_root.as_os_str());
    dir.push("/lxc/");
    dir.push(group);

    let mut fifo = dir.clone();
    fifo.push("/");
    fifo.push(FIFO_NAME);

    if fifo.len() >= PATH_MAX {
        return Err(AddressError::PathTooLong {
            path: PathBuf::from(fifo),
            max: PATH_MAX,
        });
    }

    if create_dirs {
        let dir = PathBuf::from(dir);
        mkdir_p(&dir, FIFO_DIR_MODE).map_err(|e| match e {
            lxcmon_core::CoreError::CreateDir { path, source } => {
                AddressError::CreateDir { path, source }
            }
            other => AddressError::RuntimeDir(other),
        })?;
    }

    Ok(PathBuf::from(fifo))
}

/// Both rendezvous addresses of a container group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAddress {
    pub fifo_path: PathBuf,
    pub socket_name: SocketName,
}

impl GroupAddress {
    /// Resolves the FIFO path and socket name for `group`.
    pub fn resolve(
        runtime_root: &Path,
        group: &str,
        create_dirs: bool,
    ) -> Result<Self, AddressError> {
        Ok(Self {
            socket_name: SocketName::for_group(group)?,
            fifo_path: fifo_path(runtime_root, group, create_dirs)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// "lxc/" + 16 hex digits + "/"
    const NAME_OVERHEAD: usize = 21;

    #[test]
    fn test_fnv1a_64_reference_vectors() {
        assert_eq!(fnv1a_64(b"", FNV1A_64_INIT), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a", FNV1A_64_INIT), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_64(b"foobar", FNV1A_64_INIT), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn test_socket_name_format() {
        let group = "/var/lib/lxc";
        let name = SocketName::for_group(group).unwrap();
        let hash = fnv1a_64(b"lxc//var/lib/lxc/monitor-sock", FNV1A_64_INIT);

        assert_eq!(name.as_str(), format!("lxc/{hash:016x}//var/lib/lxc"));
        assert_eq!(name.to_string(), format!("@lxc/{hash:016x}//var/lib/lxc"));
    }

    #[test]
    fn test_socket_name_is_deterministic() {
        let a = SocketName::for_group("/home/user/.local/share/lxc").unwrap();
        let b = SocketName::for_group("/home/user/.local/share/lxc").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_sun_path(), b.to_sun_path());
    }

    #[test]
    fn test_socket_name_limit_boundary() {
        let fits = "g".repeat(MAX_SOCKET_NAME_LEN - NAME_OVERHEAD);
        let name = SocketName::for_group(&fits).unwrap();
        assert_eq!(name.len(), MAX_SOCKET_NAME_LEN);

        let too_long = "g".repeat(MAX_SOCKET_NAME_LEN - NAME_OVERHEAD + 1);
        match SocketName::for_group(&too_long) {
            Err(AddressError::TooLong { len, max, .. }) => {
                assert_eq!(len, MAX_SOCKET_NAME_LEN + 1);
                assert_eq!(max, 105);
            }
            other => panic!("Expected TooLong, got {other:?}"),
        }
    }

    #[test]
    fn test_sun_path_image() {
        let name = SocketName::for_group("test1").unwrap();
        let sun_path = name.to_sun_path();

        assert_eq!(sun_path[0], 0);
        assert_eq!(&sun_path[1..=name.len()], name.as_bytes());
        assert!(sun_path[name.len() + 1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_fifo_path_layout() {
        let path = fifo_path(Path::new("/run"), "/var/lib/lxc", false).unwrap();
        assert_eq!(path, PathBuf::from("/run/lxc//var/lib/lxc/monitor-fifo"));

        let relative = fifo_path(Path::new("/run/user/1000"), "test1", false).unwrap();
        assert_eq!(relative, PathBuf::from("/run/user/1000/lxc/test1/monitor-fifo"));
    }

    #[test]
    fn test_fifo_path_creates_parent() {
        let temp = tempfile::tempdir().unwrap();
        let path = fifo_path(temp.path(), "/var/lib/lxc", true).unwrap();

        let parent = path.parent().unwrap();
        assert!(parent.is_dir());
        assert!(!path.exists());
    }

    #[test]
    fn test_fifo_path_without_create_touches_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let path = fifo_path(temp.path(), "group", false).unwrap();
        assert!(!path.parent().unwrap().exists());
    }

    #[test]
    fn test_fifo_path_create_failure_reported() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("lxc");
        std::fs::write(&blocker, b"file in the way").unwrap();

        let err = fifo_path(temp.path(), "group", true).unwrap_err();
        assert!(matches!(err, AddressError::CreateDir { .. }));
    }

    #[test]
    fn test_fifo_path_too_long() {
        let group = "d/".repeat(PATH_MAX / 2);
        let err = fifo_path(Path::new("/run"), &group, false).unwrap_err();
        assert!(matches!(err, AddressError::PathTooLong { .. }));
    }

    #[test]
    fn test_group_address_resolve() {
        let addr = GroupAddress::resolve(Path::new("/run"), "test1", false).unwrap();
        assert_eq!(addr.fifo_path, PathBuf::from("/run/lxc/test1/monitor-fifo"));
        assert_eq!(addr.socket_name, SocketName::for_group("test1").unwrap());
    }

    proptest! {
        #[test]
        fn prop_distinct_groups_get_distinct_names(
            a in "[a-zA-Z0-9/._-]{1,84}",
            b in "[a-zA-Z0-9/._-]{1,84}",
        ) {
            prop_assume!(a != b);
            let name_a = SocketName::for_group(&a).unwrap();
            let name_b = SocketName::for_group(&b).unwrap();
            prop_assert_ne!(name_a.as_bytes(), name_b.as_bytes());
        }

        #[test]
        fn prop_resolution_is_deterministic(group in "[a-zA-Z0-9/._-]{1,84}") {
            let first = GroupAddress::resolve(Path::new("/run"), &group, false).unwrap();
            let second = GroupAddress::resolve(Path::new("/run"), &group, false).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
