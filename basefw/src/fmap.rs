use crate::Error;
use scroll::{ctx, Pread, LE};

pub const FMAP_SIGNATURE: &[u8; 8] = b"__FMAP__";
pub const FMAP_NAME_LEN: usize = 32;
/// Packed size of [`FmapHeader`] including the signature.
pub const FMAP_HEADER_LEN: usize = 56;
/// Packed size of one [`FmapArea`].
pub const FMAP_AREA_LEN: usize = 42;

///Header of a flash map
#[derive(Debug, PartialEq)]
pub struct FmapHeader {
    pub ver_major: u8,
    pub ver_minor: u8,
    //physical address of the flash, unused by the updater
    pub base: u64,
    pub size: u32,
    pub name: String,
    pub nareas: u16,
}

///One named region of the image
#[derive(Debug, PartialEq)]
pub struct FmapArea {
    pub offset: u32,
    pub size: u32,
    pub name: String,
    pub flags: u16,
}

impl FmapArea {
    /// Byte range of the area, or `None` if it does not fit in `len` bytes.
    pub fn range(&self, len: usize) -> Option<core::ops::Range<usize>> {
        let start = self.offset as usize;
        let end = start.checked_add(self.size as usize)?;
        if end > len {
            return None;
        }
        Some(start..end)
    }
}

#[derive(Debug, PartialEq)]
pub struct Fmap {
    pub header: FmapHeader,
    pub areas: Vec<FmapArea>,
}

impl Fmap {
    pub fn area(&self, name: &str) -> Option<&FmapArea> {
        self.areas.iter().find(|a| a.name == name)
    }
}

/// Locates the flash map inside an image and parses it with its areas.
///
/// The signature may also show up inside code or data, so every match is
/// tried in order and the first one that parses wins. If none does, the
/// error of the last candidate is returned.
pub fn find_fmap(image: &[u8]) -> Result<Fmap, Error> {
    let mut result = Err(Error::Image("no flash map"));

    let candidates = image
        .windows(FMAP_SIGNATURE.len())
        .enumerate()
        .filter(|(_, w)| *w == FMAP_SIGNATURE)
        .map(|(start, _)| start);
    for start in candidates {
        result = parse_fmap_at(image, start);
        match &result {
            Ok(fmap) => {
                log::debug!(
                    "{:?} with {} areas at {:#x}",
                    fmap.header.name,
                    fmap.areas.len(),
                    start
                );
                break;
            }
            Err(e) => log::debug!("skipping signature at {:#x}: {}", start, e),
        }
    }

    result
}

fn parse_fmap_at(image: &[u8], start: usize) -> Result<Fmap, Error> {
    let mut offset = start;
    let header = image.gread_with::<FmapHeader>(&mut offset, LE)?;
    if header.ver_major != 1 {
        return Err(Error::Image("unsupported flash map version"));
    }
    if header.size as usize > image.len() {
        return Err(Error::Image("flash map larger than image"));
    }

    let mut areas = Vec::with_capacity(header.nareas as usize);
    for _ in 0..header.nareas {
        areas.push(image.gread_with::<FmapArea>(&mut offset, LE)?);
    }

    Ok(Fmap { header, areas })
}

fn read_name(this: &[u8], offset: &mut usize) -> Result<String, Error> {
    let mut bytes = [0_u8; FMAP_NAME_LEN];
    this.gread_inout_with(offset, &mut bytes, LE)?;

    let len = bytes.iter().position(|b| *b == 0).unwrap_or(FMAP_NAME_LEN);
    let name = core::str::from_utf8(&bytes[..len])?;

    Ok(name.into())
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for FmapHeader {
    type Error = Error;
    fn try_from_ctx(this: &'a [u8], le: scroll::Endian) -> Result<(Self, usize), Self::Error> {
        if this.len() < FMAP_HEADER_LEN {
            return Err(Error::Image("truncated flash map header"));
        }
        if &this[..FMAP_SIGNATURE.len()] != FMAP_SIGNATURE {
            return Err(Error::Image("bad flash map signature"));
        }

        let mut offset = FMAP_SIGNATURE.len();
        let ver_major = this.gread_with::<u8>(&mut offset, le)?;
        let ver_minor = this.gread_with::<u8>(&mut offset, le)?;
        let base = this.gread_with::<u64>(&mut offset, le)?;
        let size = this.gread_with::<u32>(&mut offset, le)?;
        let name = read_name(this, &mut offset)?;
        let nareas = this.gread_with::<u16>(&mut offset, le)?;

        Ok((
            FmapHeader {
                ver_major,
                ver_minor,
                base,
                size,
                name,
                nareas,
            },
            offset,
        ))
    }
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for FmapArea {
    type Error = Error;
    fn try_from_ctx(this: &'a [u8], le: scroll::Endian) -> Result<(Self, usize), Self::Error> {
        if this.len() < FMAP_AREA_LEN {
            return Err(Error::Image("truncated flash map area"));
        }

        let mut offset = 0;
        let area_offset = this.gread_with::<u32>(&mut offset, le)?;
        let size = this.gread_with::<u32>(&mut offset, le)?;
        let name = read_name(this, &mut offset)?;
        let flags = this.gread_with::<u16>(&mut offset, le)?;

        Ok((
            FmapArea {
                offset: area_offset,
                size,
                name,
                flags,
            },
            offset,
        ))
    }
}
