use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tierfs_core::{Fid, MountPoint, RequestKind};
use tierfs_hsm::hsm_state;
use tierfs_sys::layout::{get_layout, STRIPE_OFFSET_ANY};
use tierfs_sys::fid::{fid_of_path_checked, fid_paths, fid_to_path};

#[derive(Parser)]
#[command(name = "tfs")]
#[command(about = "TierFS filesystem tools", long_about = None)]
pub struct Cli {
    /// Filesystem mount root (needed by fid2path and hsm requests).
    #[arg(short, long, env = "TIERFS_MOUNT")]
    pub mount: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the path(s) a fid resolves to.
    Fid2path {
        /// Only print the hard link at this index.
        #[arg(short, long)]
        link: Option<u32>,
        /// Prefix every path with its fid even for a single argument.
        #[arg(short, long)]
        verbose: bool,
        /// Fids like [0x200000401:0x15:0x0].
        #[arg(required = true)]
        fids: Vec<String>,
    },
    /// Print the fid of each path.
    Path2fid {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the HSM status of each path.
    HsmState {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the striping layout of each path.
    Stripe {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Submit an HSM request for the given paths.
    Hsm {
        /// One of: archive, restore, release, remove, cancel.
        operation: String,
        /// Archive backend to address.
        #[arg(short, long, default_value = "1")]
        archive_id: u32,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Fid2path {
                link,
                verbose,
                ref fids,
            } => self.fid2path(link, verbose, fids),
            Command::Path2fid { ref paths } => path2fid(paths),
            Command::HsmState { ref paths } => hsm_state_cmd(paths),
            Command::Stripe { ref paths } => stripe(paths),
            Command::Hsm {
                ref operation,
                archive_id,
                ref paths,
            } => self.hsm_request(operation, archive_id, paths),
        }
    }

    fn mount(&self) -> Result<MountPoint> {
        let path = self
            .mount
            .as_ref()
            .context("no mount root: pass --mount or set TIERFS_MOUNT")?;
        Ok(MountPoint::new(path)?)
    }

    fn fid2path(&self, link: Option<u32>, verbose: bool, fids: &[String]) -> Result<()> {
        let mount = self.mount()?;
        let mount_file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(mount.path())
            .with_context(|| format!("cannot open {mount}"))?;
        let mount_fd = mount_file.as_raw_fd();
        let prefix = verbose || fids.len() > 1;

        let mut failed = false;
        for fid_str in fids {
            let fid: Fid = match fid_str.parse() {
                Ok(fid) => fid,
                Err(e) => {
                    eprintln!("{fid_str}: {e}");
                    failed = true;
                    continue;
                }
            };
            let paths = match link {
                Some(linkno) => {
                    let mut recno = 0u64;
                    let mut linkno = linkno;
                    fid_to_path(mount_fd, &fid, &mut recno, &mut linkno).map(|p| vec![p])
                }
                None => fid_paths(mount_fd, &fid),
            };
            match paths {
                Ok(paths) => {
                    for p in paths {
                        if prefix {
                            println!("{fid}: {p}");
                        } else {
                            println!("{p}");
                        }
                    }
                }
                Err(e) => {
                    eprintln!("{fid}: {e}");
                    failed = true;
                }
            }
        }
        anyhow::ensure!(!failed, "some fids could not be resolved");
        Ok(())
    }

    fn hsm_request(&self, operation: &str, archive_id: u32, paths: &[PathBuf]) -> Result<()> {
        let kind = parse_request_kind(operation)?;
        let mount = self.mount()?;

        let mut fids = Vec::with_capacity(paths.len());
        for path in paths {
            let fid = fid_of_path_checked(path)
                .with_context(|| format!("{}: cannot resolve fid", path.display()))?;
            fids.push(fid);
        }

        let count = tierfs_hsm::submit(&mount, kind, archive_id, &fids)?;
        println!("{kind}: {} of {} submitted", count.submitted, count.requested);
        Ok(())
    }
}

fn parse_request_kind(operation: &str) -> Result<RequestKind> {
    match operation.to_ascii_lowercase().as_str() {
        "archive" => Ok(RequestKind::Archive),
        "restore" => Ok(RequestKind::Restore),
        "release" => Ok(RequestKind::Release),
        "remove" => Ok(RequestKind::Remove),
        "cancel" => Ok(RequestKind::Cancel),
        other => anyhow::bail!("unknown hsm operation: {other}"),
    }
}

fn path2fid(paths: &[PathBuf]) -> Result<()> {
    let prefix = paths.len() > 1;
    let mut failed = false;
    for path in paths {
        match fid_of_path_checked(path) {
            Ok(fid) => {
                if prefix {
                    println!("{}: {fid}", path.display());
                } else {
                    println!("{fid}");
                }
            }
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                failed = true;
            }
        }
    }
    anyhow::ensure!(!failed, "some paths could not be resolved");
    Ok(())
}

fn hsm_state_cmd(paths: &[PathBuf]) -> Result<()> {
    let mut failed = false;
    for path in paths {
        match hsm_state(path) {
            Ok(state) => println!("{}: {state}", path.display()),
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                failed = true;
            }
        }
    }
    anyhow::ensure!(!failed, "some paths could not be queried");
    Ok(())
}

fn stripe(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let layout =
            get_layout(path).with_context(|| format!("{}: no striping layout", path.display()))?;
        println!("{}:", path.display());
        println!("  pattern:       {:#x}{}", layout.pattern, if layout.is_released() { " (released)" } else { "" });
        println!("  stripe_size:   {}", layout.stripe_size);
        println!("  stripe_count:  {}", layout.stripe_count);
        if layout.stripe_offset == STRIPE_OFFSET_ANY {
            println!("  stripe_offset: any");
        } else {
            println!("  stripe_offset: {}", layout.stripe_offset);
        }
        if let Some(pool) = &layout.pool {
            println!("  pool:          {pool}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kinds_parse_case_insensitively() {
        assert_eq!(parse_request_kind("archive").unwrap(), RequestKind::Archive);
        assert_eq!(parse_request_kind("RELEASE").unwrap(), RequestKind::Release);
        assert!(parse_request_kind("defrost").is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["tfs", "--mount", "/mnt/t", "fid2path", "[0x200000401:0x15:0x0]"]);
        assert!(matches!(cli.command, Command::Fid2path { .. }));

        let cli = Cli::parse_from(["tfs", "hsm", "archive", "-a", "2", "/mnt/t/file"]);
        match cli.command {
            Command::Hsm { ref operation, archive_id, ref paths } => {
                assert_eq!(operation, "archive");
                assert_eq!(archive_id, 2);
                assert_eq!(paths.len(), 1);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
