//! lxc-monitord - per-lxcpath event fan-out daemon
//!
//! Spawned by lxc-monitor with `<LXCPATH> <READY_FD>`; reads events from
//! the lxcpath's monitor FIFO and pushes them to every connected
//! subscriber. Exits after a period without subscribers.

fn main() -> anyhow::Result<()> {
    lxcmond::cli::main()
}
