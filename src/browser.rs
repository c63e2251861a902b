//! ISO 9660 filesystem browser over raw 2352 byte/sector data tracks.
//!
//! `ImageBrowser` owns the track reader and is the only one doing I/O.
//! `Entry` values are plain descriptions of directory records: every
//! operation that needs sector data goes through the browser.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::ControlFlow;
use std::path::Path;

use crate::iso9660::{
    DirectoryRecord, RecordCursor, VolumeDescriptor, VolumeDescriptorType, SYSTEM_AREA_SIZE,
};
use crate::sector::{Payload, Sector, XaForm, FORM1_DATA_SIZE, FORM2_DATA_SIZE, SECTOR_SIZE};
use crate::{CdError, CdResult, Policy};

/// Number of sectors sampled by `ImageBrowser::is_interleaved`
const INTERLEAVE_SAMPLE: u32 = 8 * 4;

/// Browser configuration
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct BrowserOptions {
    /// How to handle directory records that fail the both-byte order check
    pub record_policy: Policy,
}

/// A file or directory of the image
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Entry {
    name: String,
    version: u32,
    record: DirectoryRecord,
}

impl Entry {
    fn new(name: String, version: u32, record: DirectoryRecord) -> Entry {
        Entry {
            name,
            version,
            record,
        }
    }

    /// Build an entry from a raw directory record, splitting the `;version` suffix
    fn from_record(record: DirectoryRecord) -> Entry {
        let identifier = String::from_utf8_lossy(&record.identifier).into_owned();

        let (name, version) = match identifier.split_once(';') {
            Some((name, version)) => (name.to_string(), version.trim().parse().unwrap_or(1)),
            None => (identifier, 1),
        };

        Entry::new(name, version, record)
    }

    /// Name without the version suffix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version number, 1 if the identifier has none
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Underlying directory record
    pub fn record(&self) -> &DirectoryRecord {
        &self.record
    }

    /// True for directories
    pub fn is_directory(&self) -> bool {
        self.record.file_flags.directory()
    }

    /// First sector of the extent
    pub fn offset(&self) -> u32 {
        self.record.offset.get()
    }

    /// Size in bytes
    pub fn size(&self) -> u32 {
        self.record.data_length.get()
    }

    /// Number of sectors spanned by the extent
    pub fn sector_count(&self) -> u32 {
        self.record.sector_count()
    }

    /// Recording date formatted as `YYYY-MM-DD`
    pub fn date(&self) -> String {
        let d = &self.record.recording_date_time;

        format!("{:04}-{:02}-{:02}", d.full_year(), d.month, d.day)
    }

    /// Recording date, `None` if invalid
    pub fn date_time(&self) -> Option<chrono::NaiveDateTime> {
        self.record.recording_date_time.to_naive()
    }
}

/// Filesystem browser for a raw data track
pub struct ImageBrowser<R = BufReader<File>> {
    reader: R,
    pvd: VolumeDescriptor,
    /// Number of sectors in the track
    track_size: u32,
    options: BrowserOptions,
}

impl ImageBrowser<BufReader<File>> {
    /// Open a raw data track
    pub fn open(path: &Path, options: BrowserOptions) -> CdResult<ImageBrowser> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        ImageBrowser::from_reader(BufReader::new(file), size, options)
    }
}

impl<R: Read + Seek> ImageBrowser<R> {
    /// Build a browser over `reader`, `size` being the length of the track in bytes. Validates
    /// the size, skips the system area and looks for the primary volume descriptor.
    pub fn from_reader(mut reader: R, size: u64, options: BrowserOptions) -> CdResult<Self> {
        let sector_size = SECTOR_SIZE as u64;

        if size % sector_size != 0 {
            return Err(CdError::NotRawImage { size });
        }

        if size < (u64::from(SYSTEM_AREA_SIZE) + 1) * sector_size {
            return Err(CdError::ImageTooSmall { size });
        }

        let track_size =
            u32::try_from(size / sector_size).map_err(|_| CdError::NotRawImage { size })?;

        reader.seek(SeekFrom::Start(u64::from(SYSTEM_AREA_SIZE) * sector_size))?;

        let mut pvd = None;
        let mut buf = [0u8; SECTOR_SIZE];

        for index in SYSTEM_AREA_SIZE..track_size {
            if let Err(e) = reader.read_exact(&mut buf) {
                log::debug!("volume descriptor scan stopped at sector {}: {}", index, e);
                break;
            }

            let sector = Sector::new(buf);

            let data = match sector.payload() {
                Payload::Mode1 { user_data, .. } => user_data,
                Payload::Mode2Form1 { user_data, .. } => user_data,
                // The identifier is always looked up at the Form 1 position
                Payload::Mode2Form2 { .. } => array_ref![sector.data_2352(), 24, FORM1_DATA_SIZE],
                _ => continue,
            };

            match VolumeDescriptor::identify(data) {
                None => break,
                Some(VolumeDescriptorType::Primary) => {
                    log::debug!("primary volume descriptor at sector {}", index);
                    pvd = Some(VolumeDescriptor::parse(data)?);
                    break;
                }
                Some(VolumeDescriptorType::SetTerminator) => break,
                Some(t) => log::debug!("skipping {:?} volume descriptor at sector {}", t, index),
            }
        }

        let pvd = pvd.ok_or(CdError::NoVolumeDescriptor)?;

        Ok(ImageBrowser {
            reader,
            pvd,
            track_size,
            options,
        })
    }

    /// Primary volume descriptor
    pub fn pvd(&self) -> &VolumeDescriptor {
        &self.pvd
    }

    /// Number of sectors in the track
    pub fn track_size(&self) -> u32 {
        self.track_size
    }

    /// Entry for the root directory
    pub fn root_directory(&self) -> Entry {
        Entry::new(String::new(), 1, self.pvd.root_directory_record.clone())
    }

    /// List a directory. Returns an empty list for files. "." and ".." are not included.
    pub fn entries(&mut self, dir: &Entry) -> CdResult<Vec<Entry>> {
        if !dir.is_directory() {
            return Ok(Vec::new());
        }

        let buffer = self.read(dir, XaForm::Form1, Policy::Strict)?;
        let mut cursor = RecordCursor::new(&buffer, self.options.record_policy);
        let mut entries = Vec::new();

        for raw in &mut cursor {
            let raw = raw?;

            if raw.record.is_self_or_parent() {
                continue;
            }

            entries.push(Entry::from_record(raw.record));
        }

        if cursor.skipped() > 0 {
            log::warn!(
                "directory '{}' at sector {}: skipped {} bytes of garbage records",
                dir.name(),
                dir.offset(),
                cursor.skipped()
            );
        }

        Ok(entries)
    }

    /// Resolve a slash separated `path` relative to `dir`. Components are matched case
    /// insensitively against either the bare name or `NAME;VERSION`. Returns `None` if any
    /// component can't be found.
    pub fn sub_entry(&mut self, dir: &Entry, path: &str) -> CdResult<Option<Entry>> {
        let mut current = dir.clone();
        let mut found_any = false;

        for component in path.split('/').filter(|c| !c.is_empty()) {
            let component = component.to_uppercase();

            let next = self.entries(&current)?.into_iter().find(|e| {
                let name = e.name().to_uppercase();

                name == component || format!("{};{}", name, e.version()) == component
            });

            match next {
                Some(e) => {
                    current = e;
                    found_any = true;
                }
                None => return Ok(None),
            }
        }

        Ok(if found_any { Some(current) } else { None })
    }

    /// Read the content of `entry`.
    ///
    /// Sectors are read sequentially from the start of the extent; only those matching `form`
    /// are kept (Mode 1 counts as Form 1), which lets interleaved XA streams be separated. The
    /// output is capped by the declared size, counted in 2048 byte units. Form 2 sectors give
    /// their full 2324 bytes except for the final partial block.
    ///
    /// With `Policy::Lenient` I/O errors end the read and the data gathered so far is returned.
    pub fn read(&mut self, entry: &Entry, form: XaForm, policy: Policy) -> CdResult<Vec<u8>> {
        let mut size = entry.size() as usize;

        // The declared size can be garbage, never reserve more than the track can hold
        let available = self
            .track_size
            .saturating_sub(entry.offset())
            .min(entry.sector_count()) as usize;
        let mut data = Vec::with_capacity(size.min(available * FORM2_DATA_SIZE));

        if let Err(e) = self.seek_sector(entry.offset()) {
            return match policy {
                Policy::Strict => Err(e),
                Policy::Lenient => Ok(data),
            };
        }

        let mut buf = [0u8; SECTOR_SIZE];

        for _ in 0..entry.sector_count() {
            if let Err(e) = self.reader.read_exact(&mut buf) {
                match policy {
                    Policy::Strict => return Err(e.into()),
                    Policy::Lenient => {
                        log::debug!("read of '{}' stopped: {}", entry.name(), e);
                        break;
                    }
                }
            }

            let sector = Sector::new(buf);

            let user_data: &[u8] = match (sector.payload(), form) {
                (Payload::Mode1 { user_data, .. }, XaForm::Form1) => user_data,
                (Payload::Mode2Form1 { user_data, .. }, XaForm::Form1) => user_data,
                (Payload::Mode2Form2 { user_data, .. }, XaForm::Form2) => user_data,
                _ => continue,
            };

            let to_copy = match form {
                XaForm::Form1 => size.min(FORM1_DATA_SIZE),
                XaForm::Form2 if size < FORM1_DATA_SIZE => size,
                XaForm::Form2 => user_data.len(),
            };

            data.extend_from_slice(&user_data[..to_copy]);
            size -= size.min(FORM1_DATA_SIZE);
        }

        Ok(data)
    }

    /// Sample up to 32 sectors from the start of `entry` and return true if the data form
    /// changes among them, as happens for files interleaving XA audio with data.
    pub fn is_interleaved(&mut self, entry: &Entry) -> CdResult<bool> {
        self.seek_sector(entry.offset())?;

        let mut buf = [0u8; SECTOR_SIZE];
        let mut file_form: Option<XaForm> = None;

        for _ in 0..entry.sector_count().min(INTERLEAVE_SAMPLE) {
            self.reader.read_exact(&mut buf)?;

            // Sectors without user data don't set the form but do break it
            let form = Sector::new(buf).kind().form();

            match file_form {
                None => file_form = form,
                Some(f) if form != Some(f) => return Ok(true),
                Some(_) => (),
            }
        }

        Ok(false)
    }

    /// True if the extent of `entry` doesn't fit in the track. Some discs carry placeholder
    /// records pointing past the end of the data.
    pub fn is_dummy(&self, entry: &Entry) -> bool {
        let offset = u64::from(entry.offset());
        let end = offset + u64::from(entry.sector_count());

        offset >= u64::from(self.track_size) || end > u64::from(self.track_size)
    }

    /// Walk the tree breadth first from the root. `f` is called for every file with its full
    /// path (components joined with '/') and may stop the walk by returning
    /// `ControlFlow::Break`. Returns true if the walk was interrupted.
    pub fn iterate<F>(&mut self, mut f: F) -> CdResult<bool>
    where
        F: FnMut(&mut Self, &str, &Entry) -> CdResult<ControlFlow<()>>,
    {
        let mut queue = VecDeque::new();
        queue.push_back((String::new(), self.root_directory()));

        while let Some((path, entry)) = queue.pop_front() {
            if entry.is_directory() {
                for child in self.entries(&entry)? {
                    let child_path = if path.is_empty() {
                        child.name().to_string()
                    } else {
                        format!("{}/{}", path, child.name())
                    };

                    queue.push_back((child_path, child));
                }
            } else if f(self, &path, &entry)?.is_break() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Read a whole raw sector of the track
    pub fn read_sector(&mut self, index: u32) -> CdResult<Sector> {
        self.seek_sector(index)?;

        let mut buf = [0u8; SECTOR_SIZE];
        self.reader.read_exact(&mut buf)?;

        Ok(Sector::new(buf))
    }

    fn seek_sector(&mut self, index: u32) -> CdResult<()> {
        if index >= self.track_size {
            return Err(CdError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("sector {} is past the end of the track", index),
            )));
        }

        self.reader
            .seek(SeekFrom::Start(u64::from(index) * SECTOR_SIZE as u64))?;

        Ok(())
    }
}
