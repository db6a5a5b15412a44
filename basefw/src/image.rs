use crate::fmap::{find_fmap, Fmap};
use crate::{Error, Section};
use core::ops::Range;
use crc_any::CRCu32;

/// A validated EC image borrowed from the caller's buffer.
///
/// Parsing checks the flash map and both sections, so every accessor is
/// infallible afterwards.
#[derive(Debug)]
pub struct FirmwareImage<'a> {
    data: &'a [u8],
    ro: SectionLayout,
    rw: SectionLayout,
}

#[derive(Debug)]
struct SectionLayout {
    range: Range<usize>,
    version: String,
}

impl<'a> FirmwareImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        let fmap = find_fmap(data)?;

        let ro = SectionLayout::locate(&fmap, data, Section::Ro)?;
        let rw = SectionLayout::locate(&fmap, data, Section::Rw)?;

        Ok(FirmwareImage { data, ro, rw })
    }

    fn layout(&self, section: Section) -> &SectionLayout {
        match section {
            Section::Ro => &self.ro,
            Section::Rw => &self.rw,
        }
    }

    /// Version string the section reports once flashed with this image.
    pub fn version(&self, section: Section) -> &str {
        &self.layout(section).version
    }

    /// Raw bytes to write into the section.
    pub fn section(&self, section: Section) -> &'a [u8] {
        &self.data[self.layout(section).range.clone()]
    }

    /// CRC-32 of the section bytes.
    pub fn checksum(&self, section: Section) -> u32 {
        let mut crc = CRCu32::crc32();
        crc.digest(self.section(section));
        crc.get_crc()
    }

    /// Board the image was built for, taken from the RO version prefix.
    pub fn board(&self) -> Option<&str> {
        let version = self.version(Section::Ro);
        version.find('_').map(|end| &version[..end])
    }
}

impl SectionLayout {
    fn locate(fmap: &Fmap, data: &[u8], section: Section) -> Result<Self, Error> {
        let range = fmap
            .area(section.area())
            .ok_or(Error::Image("missing section area"))?
            .range(data.len())
            .ok_or(Error::Image("section outside image"))?;
        if range.is_empty() {
            return Err(Error::Image("empty section"));
        }

        let id = fmap
            .area(section.version_area())
            .ok_or(Error::Image("missing version area"))?
            .range(data.len())
            .ok_or(Error::Image("version outside image"))?;

        //version is NUL-terminated inside its area
        let bytes = &data[id];
        let len = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or(Error::Image("unterminated version"))?;
        if len == 0 {
            return Err(Error::Image("empty version"));
        }
        let version = core::str::from_utf8(&bytes[..len])?;

        Ok(SectionLayout {
            range,
            version: version.into(),
        })
    }
}

/// Builds an image with a flash map and the given versions for tests.
#[cfg(test)]
pub(crate) fn test_image(ro: &str, rw: &str) -> Vec<u8> {
    use crate::fmap::{FMAP_NAME_LEN, FMAP_SIGNATURE};
    use scroll::{Pwrite, LE};

    const SECTION_SIZE: u32 = 0x800;

    let mut image = vec![0xff_u8; 2 * SECTION_SIZE as usize];
    let areas: [(u32, u32, &str); 5] = [
        (0, SECTION_SIZE, "EC_RO"),
        (0x100, 32, "RO_FRID"),
        (0x200, 0x100, "FMAP"),
        (SECTION_SIZE, SECTION_SIZE, "EC_RW"),
        (SECTION_SIZE + 0x100, 32, "RW_FWID"),
    ];

    let mut write_str = |offset: usize, s: &str, len: usize| {
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(len, 0);
        image[offset..offset + len].copy_from_slice(&bytes);
    };
    write_str(0x100, ro, 32);
    write_str(SECTION_SIZE as usize + 0x100, rw, 32);

    let mut offset = 0x200;
    image.gwrite_with(&FMAP_SIGNATURE[..], &mut offset, ()).unwrap();
    image.gwrite_with(1_u8, &mut offset, LE).unwrap();
    image.gwrite_with(1_u8, &mut offset, LE).unwrap();
    image.gwrite_with(0_u64, &mut offset, LE).unwrap();
    image.gwrite_with(2 * SECTION_SIZE, &mut offset, LE).unwrap();
    let mut name = [0_u8; FMAP_NAME_LEN];
    name[..7].copy_from_slice(b"EC_FMAP");
    image.gwrite_with(&name[..], &mut offset, ()).unwrap();
    image.gwrite_with(areas.len() as u16, &mut offset, LE).unwrap();
    for (area_offset, size, area) in areas.iter() {
        image.gwrite_with(*area_offset, &mut offset, LE).unwrap();
        image.gwrite_with(*size, &mut offset, LE).unwrap();
        let mut name = [0_u8; FMAP_NAME_LEN];
        name[..area.len()].copy_from_slice(area.as_bytes());
        image.gwrite_with(&name[..], &mut offset, ()).unwrap();
        image.gwrite_with(0_u16, &mut offset, LE).unwrap();
    }

    image
}
