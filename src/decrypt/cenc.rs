//! CENC fMP4 decrypter.
//!
//! Transforms a concatenated init+media fragment with `cenc` (AES-CTR)
//! encryption into an equivalent unencrypted fragment a standard remuxer
//! accepts: strips the protection boxes, restores the original codec fourCC,
//! re-bases the offsets those boxes occupied, and decrypts mdat samples.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;

use super::ClearKeySet;
use crate::Result;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Per-sample auxiliary information parsed out of `senc`.
#[derive(Debug, Clone)]
struct SampleAuxInfo {
    encrypted: bool,
    iv: [u8; 8],
    subsamples: Vec<SubSample>,
}

#[derive(Debug, Clone, Copy)]
struct SubSample {
    clear: u16,
    encrypted: u32,
}

#[derive(Debug)]
struct Atom<'a> {
    kind: [u8; 4],
    data: &'a [u8],
    /// Declared size including header, for overhead accounting.
    size: u32,
}

pub struct Mp4Decrypter {
    keys: ClearKeySet,
    current_key: Option<[u8; 16]>,
    trun_sample_sizes: Vec<u32>,
    sample_info: Vec<SampleAuxInfo>,
    encryption_overhead: u32,
}

impl Mp4Decrypter {
    pub fn new(keys: ClearKeySet) -> Self {
        Self {
            keys,
            current_key: None,
            trun_sample_sizes: Vec::new(),
            sample_info: Vec::new(),
            encryption_overhead: 0,
        }
    }

    /// Decrypt a combined init+media segment. Best effort: unknown or
    /// truncated structure passes through untouched.
    pub fn decrypt_segment(&mut self, combined: &[u8]) -> Result<Vec<u8>> {
        let atoms = parse_atoms(combined);

        // moof populates the sample info sidx and mdat need; moov is
        // independent but kept first to mirror file order semantics.
        let mut processed: Vec<Option<Vec<u8>>> = vec![None; atoms.len()];
        for kind in [*b"moov", *b"moof", *b"sidx", *b"mdat"] {
            if let Some(index) = atoms.iter().position(|a| a.kind == kind) {
                processed[index] = Some(self.process_atom(&atoms[index])?);
            }
        }

        let mut out = Vec::with_capacity(combined.len());
        for (atom, replacement) in atoms.iter().zip(processed) {
            match replacement {
                Some(data) => out.extend_from_slice(&data),
                None => out.extend_from_slice(&pack_atom(&atom.kind, atom.data)),
            }
        }
        Ok(out)
    }

    fn process_atom(&mut self, atom: &Atom) -> Result<Vec<u8>> {
        match &atom.kind {
            b"moov" => Ok(self.process_moov(atom)),
            b"moof" => Ok(self.process_moof(atom)),
            b"sidx" => Ok(self.process_sidx(atom)),
            b"mdat" => self.decrypt_mdat(atom),
            _ => Ok(pack_atom(&atom.kind, atom.data)),
        }
    }

    fn process_moov(&mut self, moov: &Atom) -> Vec<u8> {
        let mut out = Vec::new();
        for atom in parse_atoms(moov.data) {
            match &atom.kind {
                b"trak" => out.extend_from_slice(&self.process_trak(&atom)),
                b"pssh" => {} // DRM system blobs are dropped
                _ => out.extend_from_slice(&pack_atom(&atom.kind, atom.data)),
            }
        }
        pack_atom(b"moov", &out)
    }

    fn process_trak(&mut self, trak: &Atom) -> Vec<u8> {
        self.rewrite_container(trak, b"trak", b"mdia", |this, inner| {
            this.rewrite_container(inner, b"mdia", b"minf", |this, inner| {
                this.rewrite_container(inner, b"minf", b"stbl", |this, inner| {
                    this.rewrite_container(inner, b"stbl", b"stsd", |this, inner| {
                        this.process_stsd(inner)
                    })
                })
            })
        })
    }

    /// Repack `outer`, replacing each `target` child via `f` and copying the
    /// rest verbatim.
    fn rewrite_container(
        &mut self,
        outer: &Atom,
        outer_kind: &[u8; 4],
        target: &[u8; 4],
        mut f: impl FnMut(&mut Self, &Atom) -> Vec<u8>,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        for atom in parse_atoms(outer.data) {
            if &atom.kind == target {
                out.extend_from_slice(&f(self, &atom));
            } else {
                out.extend_from_slice(&pack_atom(&atom.kind, atom.data));
            }
        }
        pack_atom(outer_kind, &out)
    }

    fn process_stsd(&mut self, stsd: &Atom) -> Vec<u8> {
        if stsd.data.len() < 8 {
            return pack_atom(b"stsd", stsd.data);
        }

        let entry_count = read_u32(stsd.data, 4) as usize;
        let mut out = Vec::new();
        out.extend_from_slice(&stsd.data[..8]); // version/flags + entry_count

        for (i, entry) in parse_atoms(&stsd.data[8..]).iter().enumerate() {
            if i >= entry_count {
                break;
            }
            out.extend_from_slice(&self.process_sample_entry(entry));
        }

        pack_atom(b"stsd", &out)
    }

    fn process_sample_entry(&mut self, entry: &Atom) -> Vec<u8> {
        // Fixed-length prefix before the child atoms.
        let fixed = match &entry.kind {
            b"mp4a" | b"enca" => 28,
            b"mp4v" | b"encv" | b"avc1" | b"hev1" | b"hvc1" => 78,
            _ => 16,
        }
        .min(entry.data.len());

        let mut out = Vec::new();
        out.extend_from_slice(&entry.data[..fixed]);

        let mut original_format: Option<[u8; 4]> = None;
        for atom in parse_atoms(&entry.data[fixed..]) {
            match &atom.kind {
                b"sinf" => original_format = extract_codec_format(&atom),
                b"schi" | b"tenc" | b"schm" => {}
                _ => out.extend_from_slice(&pack_atom(&atom.kind, atom.data)),
            }
        }

        let kind = original_format.unwrap_or(entry.kind);
        pack_atom(&kind, &out)
    }

    fn process_moof(&mut self, moof: &Atom) -> Vec<u8> {
        let mut out = Vec::new();
        for atom in parse_atoms(moof.data) {
            if &atom.kind == b"traf" {
                out.extend_from_slice(&self.process_traf(&atom));
            } else {
                out.extend_from_slice(&pack_atom(&atom.kind, atom.data));
            }
        }
        pack_atom(b"moof", &out)
    }

    fn process_traf(&mut self, traf: &Atom) -> Vec<u8> {
        let atoms = parse_atoms(traf.data);

        // Overhead removed from this traf; trun.data_offset and
        // sidx.referenced_size must shrink by the same amount.
        self.encryption_overhead = atoms
            .iter()
            .filter(|a| matches!(&a.kind, b"senc" | b"saiz" | b"saio"))
            .map(|a| a.size)
            .sum();

        let mut out = Vec::new();
        let mut track_id = None;
        let mut sample_count = 0usize;
        let mut sample_info = Vec::new();

        for atom in &atoms {
            match &atom.kind {
                b"tfhd" => {
                    if atom.data.len() >= 8 {
                        track_id = Some(read_u32(atom.data, 4));
                    }
                    out.extend_from_slice(&pack_atom(&atom.kind, atom.data));
                }
                b"trun" => {
                    sample_count = self.parse_trun_sample_sizes(atom.data);
                    out.extend_from_slice(&self.modify_trun(atom.data));
                }
                b"senc" => sample_info = parse_senc(atom.data, sample_count),
                b"saiz" | b"saio" => {}
                _ => out.extend_from_slice(&pack_atom(&atom.kind, atom.data)),
            }
        }

        if let Some(track_id) = track_id {
            self.current_key = self.keys.key_for_track(track_id);
            self.sample_info = sample_info;
        }

        pack_atom(b"traf", &out)
    }

    /// Walk trun sample entries, collecting per-sample sizes. Returns the
    /// declared sample count.
    fn parse_trun_sample_sizes(&mut self, data: &[u8]) -> usize {
        if data.len() < 8 {
            return 0;
        }

        let flags = read_u32(data, 0) & 0x00FF_FFFF;
        let sample_count = read_u32(data, 4) as usize;

        let mut offset = 8;
        if flags & 0x000001 != 0 {
            offset += 4; // data-offset-present
        }
        if flags & 0x000004 != 0 {
            offset += 4; // first-sample-flags-present
        }

        self.trun_sample_sizes = vec![0u32; sample_count];
        for i in 0..sample_count {
            if offset >= data.len() {
                break;
            }
            if flags & 0x000100 != 0 {
                offset += 4; // sample-duration-present
            }
            if flags & 0x000200 != 0 && offset + 4 <= data.len() {
                self.trun_sample_sizes[i] = read_u32(data, offset);
                offset += 4;
            }
            if flags & 0x000400 != 0 {
                offset += 4; // sample-flags-present
            }
            if flags & 0x000800 != 0 {
                offset += 4; // sample-composition-time-offsets-present
            }
        }

        sample_count
    }

    /// Shift data_offset back by the bytes the removed boxes occupied.
    fn modify_trun(&self, data: &[u8]) -> Vec<u8> {
        let mut data = data.to_vec();
        if data.len() >= 12 {
            let flags = read_u32(&data, 0) & 0x00FF_FFFF;
            if flags & 0x000001 != 0 {
                let offset = read_u32(&data, 8) as i32;
                let adjusted = offset.wrapping_sub(self.encryption_overhead as i32);
                data[8..12].copy_from_slice(&(adjusted as u32).to_be_bytes());
            }
        }
        pack_atom(b"trun", &data)
    }

    /// referenced_size lives in the low 31 bits of the first reference entry
    /// at payload offset 32; the top bit is reference_type and is preserved.
    fn process_sidx(&self, sidx: &Atom) -> Vec<u8> {
        if sidx.data.len() < 36 {
            return pack_atom(b"sidx", sidx.data);
        }

        let mut data = sidx.data.to_vec();
        let current = read_u32(&data, 32);
        let reference_type = current & 0x8000_0000;
        let referenced_size = (current & 0x7FFF_FFFF).wrapping_sub(self.encryption_overhead);
        data[32..36].copy_from_slice(&(reference_type | (referenced_size & 0x7FFF_FFFF)).to_be_bytes());

        pack_atom(b"sidx", &data)
    }

    fn decrypt_mdat(&mut self, mdat: &Atom) -> Result<Vec<u8>> {
        if self.current_key.is_none() || self.sample_info.is_empty() {
            return Ok(pack_atom(b"mdat", mdat.data));
        }

        let mut out = Vec::with_capacity(mdat.data.len());
        let mut pos = 0usize;

        let sample_info = self.sample_info.clone();
        for (i, info) in sample_info.iter().enumerate() {
            if pos >= mdat.data.len() {
                break;
            }

            let mut sample_size = match self.trun_sample_sizes.get(i) {
                Some(&size) => size as usize,
                None => mdat.data.len() - pos,
            };
            // The last sample may be clamped to what is actually present.
            sample_size = sample_size.min(mdat.data.len() - pos);

            let sample = &mdat.data[pos..pos + sample_size];
            pos += sample_size;

            out.extend_from_slice(&self.decrypt_sample(sample, info));
        }

        Ok(pack_atom(b"mdat", &out))
    }

    fn decrypt_sample(&self, sample: &[u8], info: &SampleAuxInfo) -> Vec<u8> {
        let Some(key) = self.current_key.filter(|_| info.encrypted) else {
            return sample.to_vec();
        };

        // 8-byte IV right-padded to the AES block size.
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&info.iv);

        // One cipher per sample; the CTR keystream continues across
        // subsample boundaries within the sample.
        let mut cipher = Aes128Ctr::new(&key.into(), &iv.into());

        if info.subsamples.is_empty() {
            let mut buf = sample.to_vec();
            cipher.apply_keystream(&mut buf);
            return buf;
        }

        let mut out = Vec::with_capacity(sample.len());
        let mut offset = 0usize;

        for sub in &info.subsamples {
            let clear_end = (offset + sub.clear as usize).min(sample.len());
            out.extend_from_slice(&sample[offset..clear_end]);
            offset = clear_end;

            let enc_end = (offset + sub.encrypted as usize).min(sample.len());
            let mut buf = sample[offset..enc_end].to_vec();
            cipher.apply_keystream(&mut buf);
            out.extend_from_slice(&buf);
            offset = enc_end;
        }

        // Trailing bytes beyond the declared subsamples are encrypted.
        if offset < sample.len() {
            let mut buf = sample[offset..].to_vec();
            cipher.apply_keystream(&mut buf);
            out.extend_from_slice(&buf);
        }

        out
    }
}

fn parse_atoms(data: &[u8]) -> Vec<Atom<'_>> {
    let mut atoms = Vec::new();
    let mut pos = 0usize;

    while pos + 8 <= data.len() {
        let mut size = read_u32(data, pos) as usize;
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&data[pos + 4..pos + 8]);
        let mut header = 8usize;

        if size == 1 && pos + 16 <= data.len() {
            size = u64::from_be_bytes(data[pos + 8..pos + 16].try_into().unwrap()) as usize;
            header = 16;
        }

        if size < 8 || pos + size > data.len() {
            break;
        }

        atoms.push(Atom {
            kind,
            data: &data[pos + header..pos + size],
            size: size as u32,
        });
        pos += size;
    }

    atoms
}

fn pack_atom(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let size = (data.len() + 8) as u32;
    let mut out = Vec::with_capacity(data.len() + 8);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out
}

fn extract_codec_format(sinf: &Atom) -> Option<[u8; 4]> {
    for atom in parse_atoms(sinf.data) {
        if &atom.kind == b"frma" && atom.data.len() >= 4 {
            let mut format = [0u8; 4];
            format.copy_from_slice(&atom.data[..4]);
            return Some(format);
        }
    }
    None
}

fn parse_senc(data: &[u8], trun_sample_count: usize) -> Vec<SampleAuxInfo> {
    if data.len() < 4 {
        return Vec::new();
    }

    let version_flags = read_u32(data, 0);
    let flags = version_flags & 0x00FF_FFFF;
    let mut pos = 4usize;

    let mut sample_count = trun_sample_count;
    if version_flags >> 24 == 0 {
        if pos + 4 > data.len() {
            return Vec::new();
        }
        sample_count = read_u32(data, pos) as usize;
        pos += 4;
    }

    let mut info = Vec::new();
    for _ in 0..sample_count {
        if pos + 8 > data.len() {
            break;
        }
        let mut iv = [0u8; 8];
        iv.copy_from_slice(&data[pos..pos + 8]);
        pos += 8;

        let mut subsamples = Vec::new();
        if flags & 0x000002 != 0 && pos + 2 <= data.len() {
            let subsample_count = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;

            for _ in 0..subsample_count {
                if pos + 6 > data.len() {
                    break;
                }
                subsamples.push(SubSample {
                    clear: u16::from_be_bytes([data[pos], data[pos + 1]]),
                    encrypted: read_u32(data, pos + 2),
                });
                pos += 6;
            }
        }

        info.push(SampleAuxInfo {
            encrypted: true,
            iv,
            subsamples,
        });
    }

    info
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap())
}
