//! File sequencing and media assignment.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::debug;
use wx_core::columns::{file, media, summary_information, wix_file};
use wx_core::{MessageCode, Output, SourceLineNumber, WixError};

use crate::error::Problems;

/// A resolved payload file and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PayloadFile {
    pub id: String,
    pub disk_id: i32,
    pub compressed: bool,
    pub source: PathBuf,
    pub directory: String,
    pub file_name: String,
    pub sequence: i32,
    pub source_line: SourceLineNumber,
}

/// Files grouped by disk, in sequence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MediaLayout {
    pub disks: BTreeMap<i32, Vec<PayloadFile>>,
}

impl MediaLayout {
    pub fn files(&self) -> impl Iterator<Item = &PayloadFile> {
        self.disks.values().flatten()
    }
}

/// Whether the package compresses files that do not say otherwise.
pub(crate) fn package_compressed(output: &Output) -> bool {
    output
        .rows("_SummaryInformation")
        .find(|row| row.get_number(summary_information::PROPERTY_ID) == Some(summary_information::WORD_COUNT))
        .and_then(|row| row.get_string(summary_information::VALUE)?.trim().parse::<i32>().ok())
        .is_some_and(|word_count| word_count & 2 != 0)
}

/// Numbers `File.Sequence` by disk then file id, stamps compression into
/// `File.Attributes` and sets `Media.LastSequence`.
pub(crate) fn assign_sequences(output: &mut Output, problems: &mut Problems<'_>) -> MediaLayout {
    let default_compressed = package_compressed(output);
    let mut layout = MediaLayout::default();
    let known_disks = output
        .rows("Media")
        .filter_map(|row| row.get_number(media::DISK_ID))
        .collect::<Vec<_>>();

    let file_names = output
        .rows("File")
        .map(|row| {
            let name = row.get_string(file::FILE_NAME).unwrap_or_default();
            (row.primary_key(), long_name(name).to_string())
        })
        .collect::<BTreeMap<_, _>>();

    for row in output.rows("WixFile") {
        let id = row.primary_key();
        let disk_id = row.get_number(wix_file::DISK_ID).unwrap_or(1);
        if !known_disks.contains(&disk_id) {
            problems.error(WixError::with_location(
                MessageCode::MediaNotFound,
                format!("File '{}' is assigned to disk {} but no Media row has that DiskId.", id, disk_id),
                row.source_line.clone(),
            ));
            continue;
        }
        let compressed = match row.get_number(wix_file::COMPRESSED) {
            Some(value) => value != 0,
            None => default_compressed,
        };
        let file_name = file_names.get(&id).cloned().unwrap_or_else(|| id.clone());
        layout.disks.entry(disk_id).or_default().push(PayloadFile {
            source: PathBuf::from(row.get_string(wix_file::SOURCE).unwrap_or_default()),
            directory: row.get_string(wix_file::DIRECTORY).unwrap_or_default().to_string(),
            source_line: row.source_line.clone(),
            id,
            disk_id,
            compressed,
            file_name,
            sequence: 0,
        });
    }

    let mut sequence = 0;
    let mut last_sequences = BTreeMap::new();
    for (disk_id, files) in &mut layout.disks {
        files.sort_by(|left, right| left.id.cmp(&right.id));
        for payload in files.iter_mut() {
            sequence += 1;
            payload.sequence = sequence;
        }
        last_sequences.insert(*disk_id, sequence);
    }

    if let Some(table) = output.table_mut("File") {
        for row in &mut table.rows {
            let key = row.primary_key();
            let Some(payload) = layout.files().find(|payload| payload.id == key) else { continue };
            let attributes = if payload.compressed {
                file::ATTRIBUTE_COMPRESSED
            } else {
                file::ATTRIBUTE_NONCOMPRESSED
            };
            let result = row
                .set_number(file::SEQUENCE, payload.sequence)
                .and_then(|()| row.set_number(file::ATTRIBUTES, attributes));
            if let Err(error) = result {
                problems.error(error);
            }
        }
    }

    let mut running = 0;
    if let Some(table) = output.table_mut("Media") {
        table.rows.sort_by_key(|row| row.get_number(media::DISK_ID));
        for row in &mut table.rows {
            let disk_id = row.get_number(media::DISK_ID).unwrap_or_default();
            running = last_sequences.get(&disk_id).copied().unwrap_or(running);
            if let Err(error) = row.set_number(media::LAST_SEQUENCE, running) {
                problems.error(error);
            }
        }
    }
    debug!("sequenced {} file(s) over {} disk(s)", sequence, layout.disks.len());
    layout
}

/// `short|long` file names keep the long part.
pub(crate) fn long_name(name: &str) -> &str {
    name.rsplit_once('|').map_or(name, |(_, long)| long)
}
