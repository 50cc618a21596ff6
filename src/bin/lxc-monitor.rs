//! lxc-monitor - watch container lifecycle events
//!
//! Starts a monitord for each requested lxcpath when needed and prints
//! state changes and exit codes as they happen.
//!
//! # Usage
//!
//! ```text
//! lxc-monitor                      # every container under /var/lib/lxc
//! lxc-monitor -n web -t 30         # container "web", give up after 30s idle
//! lxc-monitor --json -P /srv/lxc   # machine readable, custom lxcpath
//! ```

fn main() -> anyhow::Result<()> {
    lxcmon::cli::main()
}
