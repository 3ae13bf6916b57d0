//! System-wide constants and default paths.

/// Default base directory for Corral state on Linux with root access.
pub const DEFAULT_ROOT_DIR: &str = "/var/lib/corral";

/// Environment variable overriding the state root.
pub const ROOT_ENV: &str = "CORRAL_ROOT";

/// Cgroup filesystem mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Name of the parent cgroup every container hierarchy lives under.
pub const CGROUP_PARENT: &str = "corral";

/// Directory (under the root) holding one subdirectory per container id.
pub const CONTAINERS_DIR: &str = "containers";

/// Directory (under the root) holding the container name index.
pub const NAMES_DIR: &str = "names";

/// Directory (under the root) holding one subdirectory per network name.
pub const NETWORKS_DIR: &str = "networks";

/// Directory (under the root) holding image tarballs and unpacked layers.
pub const IMAGES_DIR: &str = "images";

/// Directory (under the root) holding per-container overlay workspaces.
pub const OVERLAY_DIR: &str = "overlay";

/// File name of a persisted container record or network config.
pub const CONFIG_FILE: &str = "config.json";

/// File name of a network's persisted address allocation.
pub const IPAM_FILE: &str = "ipam.json";

/// File name of a network's allocator lock.
pub const IPAM_LOCK_FILE: &str = "ipam.lock";

/// File name of a container's captured output.
pub const LOG_FILE: &str = "container.log";

/// Optional runtime configuration file under the root.
pub const RUNTIME_CONFIG_FILE: &str = "config.json";

/// File descriptor on which the container init receives its command.
pub const INIT_PIPE_FD: i32 = 3;

/// Marker variable set on the re-entrant `exec` call inside the target
/// container's namespaces. Holds the target pid.
pub const EXEC_PID_ENV: &str = "CORRAL_EXEC_PID";

/// Marker variable carrying the container hostname to `init`.
pub const INIT_HOSTNAME_ENV: &str = "CORRAL_HOSTNAME";

/// Default network driver.
pub const DEFAULT_DRIVER: &str = "bridge";

/// Maximum Linux interface name length.
pub const IFNAME_MAX: usize = 15;

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "corral";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "corral";
