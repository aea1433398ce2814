//! A [`Driver`] backed by a PCAP capture file: inbound frames are read from `input` once at
//! construction, queued, and drained through `read`; transmitted frames are appended to `output`
//! as new records.
//!
//! Format: a 24-byte global header followed by any number of `{16-byte record header, frame
//! bytes}` records (libpcap "classic" format, `LINKTYPE_ETHERNET`). Grounded on the reference
//! driver's read-the-whole-file-then-serve-from-memory approach, rather than streaming reads off
//! the filesystem on every poll.

use std::fs::File;
use std::io::{self, BufWriter, Read as IoRead, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};

use netstack::buffer::{DeviceId, Flags, Layer, LayerMask, PacketBuffer};
use netstack::device::{Device, Driver, DriverError};

const MAGIC: u32 = 0xa1b2_c3d4;
const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;
const LINKTYPE_ETHERNET: u32 = 1;
const SNAPLEN: u32 = 65535;

pub struct PcapDriver {
    dev: DeviceId,
    pending: std::collections::VecDeque<Vec<u8>>,
    out: BufWriter<File>,
}

impl PcapDriver {
    pub fn open(dev: DeviceId, input: &Path, output: &Path) -> io::Result<Self> {
        let pending = read_frames(input)?;
        let mut out = BufWriter::new(File::create(output)?);
        write_global_header(&mut out)?;
        Ok(PcapDriver { dev, pending, out })
    }
}

fn read_frames(path: &Path) -> io::Result<std::collections::VecDeque<Vec<u8>>> {
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;
    if raw.len() < GLOBAL_HEADER_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "capture file shorter than its global header"));
    }
    let little_endian = if LittleEndian::read_u32(&raw[0..4]) == MAGIC {
        true
    } else if BigEndian::read_u32(&raw[0..4]) == MAGIC {
        false
    } else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad pcap magic number"));
    };

    let mut frames = std::collections::VecDeque::new();
    let mut cursor = GLOBAL_HEADER_LEN;
    while cursor + RECORD_HEADER_LEN <= raw.len() {
        let header = &raw[cursor..cursor + RECORD_HEADER_LEN];
        let incl_len = if little_endian {
            LittleEndian::read_u32(&header[8..12])
        } else {
            BigEndian::read_u32(&header[8..12])
        } as usize;
        cursor += RECORD_HEADER_LEN;
        if cursor + incl_len > raw.len() {
            break;
        }
        frames.push_back(raw[cursor..cursor + incl_len].to_vec());
        cursor += incl_len;
    }
    Ok(frames)
}

fn write_global_header(out: &mut BufWriter<File>) -> io::Result<()> {
    out.write_u32::<LittleEndian>(MAGIC)?;
    out.write_u16::<LittleEndian>(2)?;
    out.write_u16::<LittleEndian>(4)?;
    out.write_i32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(0)?;
    out.write_u32::<LittleEndian>(SNAPLEN)?;
    out.write_u32::<LittleEndian>(LINKTYPE_ETHERNET)?;
    Ok(())
}

impl Driver for PcapDriver {
    fn write(&mut self, _dev: &Device, nb: PacketBuffer) -> Result<(), DriverError> {
        let frame = nb.window(Layer::Datalink);
        self.out
            .write_u32::<LittleEndian>(0)
            .and_then(|_| self.out.write_u32::<LittleEndian>(0))
            .and_then(|_| self.out.write_u32::<LittleEndian>(frame.len() as u32))
            .and_then(|_| self.out.write_u32::<LittleEndian>(frame.len() as u32))
            .and_then(|_| self.out.write_all(frame))
            .and_then(|_| self.out.flush())
            .map_err(|e| DriverError::Io(e.to_string()))
    }

    fn read(&mut self, dev: &Device, max: usize) -> Result<usize, DriverError> {
        let mut count = 0;
        while count < max {
            let raw = match self.pending.pop_front() {
                Some(raw) => raw,
                None => break,
            };
            let mut nb = PacketBuffer::alloc(self.dev, LayerMask::DATALINK, raw.len());
            nb.window_mut(Layer::Datalink).copy_from_slice(&raw);
            nb.set_flag(Flags::RX);
            dev.add_backlog(nb);
            count += 1;
        }
        Ok(count)
    }

    fn available(&mut self, _dev: &Device) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }
}
