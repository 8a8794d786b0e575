//! Cabinet planning and the worker pool that builds them.
//!
//! The compression format itself is a black box behind [`CabinetCodec`];
//! [`StoredCabinetCodec`] is the built-in codec and stores files without
//! compression.

use std::collections::VecDeque;
use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use log::{debug, info};
use sha2::{Digest, Sha256};
use wx_core::{MessageCode, WixError};

use crate::file_manager::{io_error, manifest_path, BuildOption, CabinetManifest, FileManager, ResolvedCabinet};

pub const CABINET_MAGIC: &[u8; 4] = b"WXCB";

/// One compressed payload file, in cabinet order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabinetFile {
    /// File id, used as the name inside the cabinet.
    pub token: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabinetPlan {
    pub disk_id: i32,
    /// Cabinet file name without the embedding `#`.
    pub name: String,
    pub embedded: bool,
    pub files: Vec<CabinetFile>,
}

impl CabinetPlan {
    /// sha256 over every token and file body, in order.
    pub fn content_hash(&self) -> Result<String, WixError> {
        let mut hasher = Sha256::new();
        let mut buffer = Vec::new();
        for file in &self.files {
            buffer.clear();
            fs::File::open(&file.path)
                .and_then(|mut handle| handle.read_to_end(&mut buffer))
                .map_err(|error| io_error(&file.path, error))?;
            hasher.update(file.token.as_bytes());
            hasher.update([0u8]);
            hasher.update((buffer.len() as u64).to_le_bytes());
            hasher.update(&buffer);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Writes one cabinet. Each worker thread owns its own writer.
pub trait CabinetWriter {
    fn add_file(&mut self, token: &str, source: &Path) -> Result<(), WixError>;
    fn finish(self: Box<Self>) -> Result<(), WixError>;
}

pub trait CabinetCodec: Send + Sync {
    fn create(&self, path: &Path) -> Result<Box<dyn CabinetWriter>, WixError>;
}

/// `WXCB`, then per file: name length (u16), name, body length (u64), body.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredCabinetCodec;

struct StoredCabinetWriter {
    path: PathBuf,
    out: BufWriter<fs::File>,
}

impl CabinetCodec for StoredCabinetCodec {
    fn create(&self, path: &Path) -> Result<Box<dyn CabinetWriter>, WixError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| io_error(parent, error))?;
        }
        let file = fs::File::create(path).map_err(|error| cabinet_error(path, error))?;
        let mut out = BufWriter::new(file);
        out.write_all(CABINET_MAGIC).map_err(|error| cabinet_error(path, error))?;
        Ok(Box::new(StoredCabinetWriter {
            path: path.to_path_buf(),
            out,
        }))
    }
}

impl CabinetWriter for StoredCabinetWriter {
    fn add_file(&mut self, token: &str, source: &Path) -> Result<(), WixError> {
        let body = fs::read(source).map_err(|error| io_error(source, error))?;
        let name_length = u16::try_from(token.len())
            .map_err(|_| cabinet_error(&self.path, format!("file token '{}' is too long", token)))?;
        let write = |out: &mut BufWriter<fs::File>| -> std::io::Result<()> {
            out.write_all(&name_length.to_le_bytes())?;
            out.write_all(token.as_bytes())?;
            out.write_all(&(body.len() as u64).to_le_bytes())?;
            out.write_all(&body)
        };
        write(&mut self.out).map_err(|error| cabinet_error(&self.path, error))
    }

    fn finish(mut self: Box<Self>) -> Result<(), WixError> {
        self.out.flush().map_err(|error| cabinet_error(&self.path, error))
    }
}

/// Reads a stored cabinet back into `(token, body)` pairs.
pub fn read_stored_cabinet(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, WixError> {
    let corrupt = || WixError::new(MessageCode::CabinetCreationFailed, "Cabinet data is truncated or corrupt.");
    let mut rest = bytes.strip_prefix(CABINET_MAGIC.as_slice()).ok_or_else(corrupt)?;
    let mut files = Vec::new();
    while !rest.is_empty() {
        let (length, tail) = rest.split_first_chunk::<2>().ok_or_else(corrupt)?;
        let length = usize::from(u16::from_le_bytes(*length));
        if tail.len() < length {
            return Err(corrupt());
        }
        let (name, tail) = tail.split_at(length);
        let (size, tail) = tail.split_first_chunk::<8>().ok_or_else(corrupt)?;
        let size = usize::try_from(u64::from_le_bytes(*size)).map_err(|_| corrupt())?;
        if tail.len() < size {
            return Err(corrupt());
        }
        let (body, tail) = tail.split_at(size);
        files.push((String::from_utf8_lossy(name).into_owned(), body.to_vec()));
        rest = tail;
    }
    Ok(files)
}

fn cabinet_error(path: &Path, error: impl std::fmt::Display) -> WixError {
    WixError::new(
        MessageCode::CabinetCreationFailed,
        format!("Failed to create cabinet '{}': {}.", path.display(), error),
    )
}

/// A planned cabinet together with the file manager's decision for it.
#[derive(Debug, Clone)]
pub struct CabinetJob {
    pub plan: CabinetPlan,
    pub sha256: String,
    pub resolved: ResolvedCabinet,
    /// Final location: inside the temp workspace for embedded cabinets, next
    /// to the package otherwise.
    pub destination: PathBuf,
}

/// Builds every job on up to `threads` workers. All workers are joined
/// before this returns; errors come back in job order.
pub fn build_cabinets(
    jobs: &[CabinetJob],
    codec: &dyn CabinetCodec,
    file_manager: &dyn FileManager,
    threads: usize,
) -> Vec<WixError> {
    let workers = threads.clamp(1, jobs.len().max(1));
    info!("building {} cabinet(s) on {} worker(s)", jobs.len(), workers);
    let queue = Mutex::new(jobs.iter().enumerate().collect::<VecDeque<_>>());
    let failures = Mutex::new(Vec::<(usize, WixError)>::new());

    thread::scope(|scope| {
        let handles = (0..workers)
            .map(|worker| {
                let queue = &queue;
                let failures = &failures;
                scope.spawn(move || loop {
                    let next = queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).pop_front();
                    let Some((index, job)) = next else { break };
                    debug!("worker {} takes cabinet {}", worker, job.plan.name);
                    if let Err(error) = build_one(job, codec, file_manager) {
                        failures
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push((index, error));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            if handle.join().is_err() {
                failures
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push((usize::MAX, WixError::unexpected("a cabinet worker panicked")));
            }
        }
    });

    let mut failures = failures.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    failures.sort_by_key(|(index, _)| *index);
    failures.into_iter().map(|(_, error)| error).collect()
}

fn build_one(job: &CabinetJob, codec: &dyn CabinetCodec, file_manager: &dyn FileManager) -> Result<(), WixError> {
    match job.resolved.build_option {
        BuildOption::Copy => file_manager.copy_file(&job.resolved.path, &job.destination, true),
        BuildOption::BuildAndMove => {
            write_cabinet(&job.plan, &job.resolved.path, codec)?;
            file_manager.move_file(&job.resolved.path, &job.destination, true)
        }
        BuildOption::BuildAndCopy => {
            write_cabinet(&job.plan, &job.resolved.path, codec)?;
            let manifest = CabinetManifest {
                cabinet: job.plan.name.clone(),
                sha256: job.sha256.clone(),
                files: job.plan.files.iter().map(|file| file.token.clone()).collect(),
            };
            let manifest_file = manifest_path(&job.resolved.path);
            let text = serde_json::to_string_pretty(&manifest)
                .map_err(|error| cabinet_error(&manifest_file, error))?;
            fs::write(&manifest_file, text).map_err(|error| io_error(&manifest_file, error))?;
            file_manager.copy_file(&job.resolved.path, &job.destination, true)
        }
    }
}

fn write_cabinet(plan: &CabinetPlan, path: &Path, codec: &dyn CabinetCodec) -> Result<(), WixError> {
    let mut writer = codec.create(path)?;
    for file in &plan.files {
        writer.add_file(&file.token, &file.path)?;
    }
    writer.finish()
}

#[cfg(test)]
mod cabinet_tests {
    use super::*;
    use crate::file_manager::DefaultFileManager;

    fn payload(root: &Path, name: &str, body: &str) -> CabinetFile {
        let path = root.join(name);
        fs::write(&path, body).expect("payload");
        CabinetFile {
            token: name.to_string(),
            path,
        }
    }

    #[test]
    fn stored_cabinets_keep_file_order() {
        let root = tempfile::tempdir().expect("tempdir");
        let plan = CabinetPlan {
            disk_id: 1,
            name: "one.cab".to_string(),
            embedded: false,
            files: vec![payload(root.path(), "b.txt", "bee"), payload(root.path(), "a.txt", "ay")],
        };
        let path = root.path().join("out/one.cab");
        write_cabinet(&plan, &path, &StoredCabinetCodec).expect("write");
        let files = read_stored_cabinet(&fs::read(&path).expect("read")).expect("parse");
        assert_eq!(
            files,
            vec![
                ("b.txt".to_string(), b"bee".to_vec()),
                ("a.txt".to_string(), b"ay".to_vec())
            ]
        );
    }

    #[test]
    fn content_hash_tracks_names_and_bodies() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut plan = CabinetPlan {
            disk_id: 1,
            name: "one.cab".to_string(),
            embedded: true,
            files: vec![payload(root.path(), "a.txt", "ay")],
        };
        let first = plan.content_hash().expect("hash");
        assert_eq!(first, plan.content_hash().expect("hash"));
        assert_eq!(first.len(), 64);
        fs::write(root.path().join("a.txt"), "changed").expect("rewrite");
        assert_ne!(first, plan.content_hash().expect("hash"));
        plan.files[0].token = "renamed".to_string();
        assert_ne!(first, plan.content_hash().expect("hash"));
    }

    #[test]
    fn worker_pool_builds_every_cabinet_and_reports_failures_in_order() {
        let root = tempfile::tempdir().expect("tempdir");
        let manager = DefaultFileManager::default();
        let mut jobs = (1..=4)
            .map(|disk| {
                let name = format!("disk{disk}.cab");
                CabinetJob {
                    plan: CabinetPlan {
                        disk_id: disk,
                        name: name.clone(),
                        embedded: false,
                        files: vec![payload(root.path(), &format!("f{disk}.txt"), "x")],
                    },
                    sha256: String::new(),
                    resolved: ResolvedCabinet {
                        build_option: BuildOption::BuildAndMove,
                        path: root.path().join("scratch").join(&name),
                    },
                    destination: root.path().join("layout").join(&name),
                }
            })
            .collect::<Vec<_>>();
        assert!(build_cabinets(&jobs, &StoredCabinetCodec, &manager, 3).is_empty());
        for job in &jobs {
            assert!(job.destination.is_file());
            assert!(!job.resolved.path.exists());
        }

        jobs[1].plan.files[0].path = root.path().join("missing.txt");
        jobs[3].plan.files[0].path = root.path().join("missing.txt");
        let errors = build_cabinets(&jobs, &StoredCabinetCodec, &manager, 2);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|error| error.code == MessageCode::IoError));
    }
}
