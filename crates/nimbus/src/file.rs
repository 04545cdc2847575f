use alloc::string::String;

#[cfg(not(feature = "fs"))]
use core::marker::PhantomData;

use log::{debug, warn};

use crate::arena::{Arena, ArenaBlock};

/// The operation requested to the firmware file system.
#[cfg(feature = "fs")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperatingMode {
    /// Open a file for reading.
    OpenRead,
    /// Open a file for writing, truncating it.
    OpenWrite,
    /// Open a file for appending.
    OpenAppend,
    /// Remove a file.
    Remove,
}

/// The status of the file associated with a [`FileConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileStatus {
    /// The file is closed.
    #[default]
    Closed,
    /// The file is opened.
    Opened,
}

/// A callback which performs a file system operation on a firmware file
/// handle.
///
/// The callback is in charge of opening, or removing, the file named
/// `filename` according to `mode`, and of storing the result into `file`.
#[cfg(feature = "fs")]
pub type FileConfigCallback<H> = fn(file: &mut H, filename: &str, mode: FileOperatingMode);

/// A firmware file handle paired with the callback operating on it.
#[cfg(feature = "fs")]
#[derive(Debug, Clone)]
pub struct FileSource<H> {
    handle: H,
    callback: FileConfigCallback<H>,
}

#[cfg(feature = "fs")]
impl<H> FileSource<H> {
    /// Creates a [`FileSource`].
    #[must_use]
    pub const fn new(handle: H, callback: FileConfigCallback<H>) -> Self {
        Self { handle, callback }
    }

    /// Returns the file handle.
    #[must_use]
    pub const fn handle(&self) -> &H {
        &self.handle
    }
}

// Either a block owned by the descriptor or a view of memory owned by
// someone else.
#[derive(Debug, Default)]
enum BlobBuffer<'a> {
    #[default]
    Empty,
    Owned(ArenaBlock),
    Borrowed(&'a [u8]),
}

impl BlobBuffer<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Owned(block) => block,
            Self::Borrowed(data) => data,
        }
    }
}

/// A write cursor over an owned blob buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobWriter {
    position: usize,
    capacity: usize,
}

impl BlobWriter {
    const fn init(capacity: usize) -> Self {
        Self {
            position: 0,
            capacity,
        }
    }

    // Copies as much of `data` as fits after the cursor.
    fn write(&mut self, buffer: &mut [u8], data: &[u8]) -> usize {
        let end = self.capacity.min(buffer.len());
        let free = end.saturating_sub(self.position);
        let count = free.min(data.len());
        buffer[self.position..self.position + count].copy_from_slice(&data[..count]);
        self.position += count;
        count
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Returns the total number of bytes the cursor can write.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A staging descriptor for a binary payload.
///
/// The payload lives either in a block owned by the descriptor, reserved
/// through [`FileConfig::init_blob_writer`], or in caller memory borrowed
/// through [`FileConfig::set_data`].
/// An owned block is released whenever the descriptor is reassigned,
/// cleared, or dropped. Borrowed memory is never released by the descriptor.
///
/// The `H` parameter is the type of the firmware file handle, used when the
/// `fs` feature is enabled.
#[derive(Debug)]
pub struct FileConfig<'a, H = ()> {
    #[cfg(feature = "fs")]
    file: Option<FileSource<H>>,
    #[cfg(not(feature = "fs"))]
    file: PhantomData<H>,
    filename: String,
    file_status: FileStatus,
    buffer: BlobBuffer<'a>,
    data_pos: usize,
    data_size: usize,
    file_size: usize,
    initialized: bool,
    writer: BlobWriter,
    arena: Arena,
}

impl<'a, H> FileConfig<'a, H> {
    /// Creates an empty [`FileConfig`] reserving its blocks from `arena`.
    #[must_use]
    #[inline]
    pub fn new(arena: Arena) -> Self {
        Self {
            #[cfg(feature = "fs")]
            file: None,
            #[cfg(not(feature = "fs"))]
            file: PhantomData,
            filename: String::new(),
            file_status: FileStatus::Closed,
            buffer: BlobBuffer::Empty,
            data_pos: 0,
            data_size: 0,
            file_size: 0,
            initialized: false,
            writer: BlobWriter::default(),
            arena,
        }
    }

    /// Reserves an owned buffer of `size` bytes and places the write cursor
    /// at its beginning.
    ///
    /// Any previously owned buffer is released first, and any borrowed
    /// buffer is dropped.
    ///
    /// When the reservation fails, the descriptor is left empty, which can
    /// be detected through [`FileConfig::data_size`].
    pub fn init_blob_writer(&mut self, size: usize) {
        self.clear_internal_data();

        if let Some(block) = self.arena.alloc(size) {
            self.buffer = BlobBuffer::Owned(block);
            self.data_size = size;
            self.writer = BlobWriter::init(size);
        } else {
            warn!("Unable to reserve a blob buffer of {size} bytes");
        }
    }

    /// Stages caller memory as the payload of the descriptor.
    ///
    /// The memory is borrowed and never released by the descriptor.
    pub fn set_data(&mut self, data: &'a [u8]) {
        self.clear_internal_data();
        self.buffer = BlobBuffer::Borrowed(data);
        self.data_size = data.len();
        self.file_size = data.len();
        self.data_pos = 0;
        self.initialized = true;
    }

    /// Copies `other` into this descriptor.
    ///
    /// Scalar fields are always copied. The buffer is shared without
    /// transferring ownership: whether `other` owns or borrows its buffer,
    /// this descriptor ends up borrowing the same memory, so it can never
    /// release it. Any buffer previously owned by this descriptor is
    /// released.
    pub fn copy_from(&mut self, other: &'a FileConfig<'_, H>)
    where
        H: Clone,
    {
        #[cfg(feature = "fs")]
        self.file.clone_from(&other.file);
        self.filename.clone_from(&other.filename);
        self.file_size = other.file_size;
        self.file_status = other.file_status;
        self.data_pos = other.data_pos;
        self.writer = other.writer;

        self.clear_internal_data();
        self.buffer = match &other.buffer {
            BlobBuffer::Empty => BlobBuffer::Empty,
            BlobBuffer::Owned(block) => BlobBuffer::Borrowed(block),
            BlobBuffer::Borrowed(data) => BlobBuffer::Borrowed(data),
        };
        self.data_size = other.data_size;
        self.initialized = other.initialized;
    }

    /// Writes `data` after the write cursor of the owned buffer.
    ///
    /// Returns the number of bytes written, which is less than `data.len()`
    /// when the buffer is full, and zero when the buffer is not owned.
    pub fn write(&mut self, data: &[u8]) -> usize {
        match &mut self.buffer {
            BlobBuffer::Owned(block) => self.writer.write(block, data),
            BlobBuffer::Empty | BlobBuffer::Borrowed(_) => 0,
        }
    }

    /// Returns the bytes written through the write cursor.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        match &self.buffer {
            BlobBuffer::Owned(block) => &block[..self.writer.position()],
            BlobBuffer::Empty | BlobBuffer::Borrowed(_) => &[],
        }
    }

    /// Returns the next chunk of at most `max` payload bytes and advances the
    /// read position past it.
    ///
    /// A `max` of zero is raised to one, so an empty chunk always means
    /// that the whole payload has been read.
    pub fn read_chunk(&mut self, max: usize) -> &[u8] {
        let start = self.data_pos.min(self.data_size);
        let end = start + max.max(1).min(self.data_size - start);
        self.data_pos = end;
        &self.buffer.as_slice()[start..end]
    }

    /// Returns the number of payload bytes not read yet.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data_size.saturating_sub(self.data_pos)
    }

    /// Returns the payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.data_size]
    }

    /// Returns whether the descriptor owns its buffer.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.buffer, BlobBuffer::Owned(_))
    }

    /// Returns whether the descriptor has been initialized with a payload.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns the payload size.
    #[must_use]
    pub const fn data_size(&self) -> usize {
        self.data_size
    }

    /// Returns the read position.
    #[must_use]
    pub const fn data_pos(&self) -> usize {
        self.data_pos
    }

    /// Returns the declared file size.
    #[must_use]
    pub const fn file_size(&self) -> usize {
        self.file_size
    }

    /// Sets the declared file size.
    pub const fn set_file_size(&mut self, file_size: usize) {
        self.file_size = file_size;
    }

    /// Returns the file name.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Sets the file name.
    pub fn set_filename(&mut self, filename: &str) {
        self.filename.clear();
        self.filename.push_str(filename);
    }

    /// Returns the file status.
    #[must_use]
    pub const fn file_status(&self) -> FileStatus {
        self.file_status
    }

    /// Returns the write cursor.
    #[must_use]
    pub const fn writer(&self) -> &BlobWriter {
        &self.writer
    }

    /// Releases any owned buffer and resets the descriptor to its empty
    /// state.
    pub fn clear(&mut self) {
        #[cfg(feature = "fs")]
        {
            self.file = None;
        }
        self.clear_internal_data();
        self.filename.clear();
        self.file_status = FileStatus::Closed;
        self.data_pos = 0;
        self.file_size = 0;
        self.initialized = false;
    }

    fn clear_internal_data(&mut self) {
        if let BlobBuffer::Owned(block) = core::mem::take(&mut self.buffer) {
            debug!("Releasing a blob buffer of {} bytes", block.len());
        }
        self.data_size = 0;
        self.writer = BlobWriter::default();
    }
}

#[cfg(feature = "fs")]
impl<H> FileConfig<'_, H> {
    /// Associates a firmware [`FileSource`] to the descriptor.
    #[must_use]
    pub fn file_source(mut self, source: FileSource<H>) -> Self {
        self.file = Some(source);
        self
    }

    /// Asks the firmware file system to perform `mode` on the descriptor
    /// file.
    ///
    /// Returns `false` when no [`FileSource`] is associated.
    pub fn open(&mut self, mode: FileOperatingMode) -> bool {
        let Some(source) = self.file.as_mut() else {
            warn!("No file source associated with `{}`", self.filename);
            return false;
        };

        (source.callback)(&mut source.handle, &self.filename, mode);

        self.file_status = match mode {
            FileOperatingMode::Remove => FileStatus::Closed,
            FileOperatingMode::OpenRead
            | FileOperatingMode::OpenWrite
            | FileOperatingMode::OpenAppend => FileStatus::Opened,
        };

        true
    }

    /// Marks the descriptor file as closed.
    pub const fn close(&mut self) {
        self.file_status = FileStatus::Closed;
    }

    /// Returns the firmware file handle, if any.
    #[must_use]
    pub fn file_handle(&self) -> Option<&H> {
        self.file.as_ref().map(FileSource::handle)
    }
}
