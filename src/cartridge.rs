use crate::utils;

const NES_TAG: [u8; 4] = [0x4E, 0x45, 0x53, 0x1A];
pub const PRG_PAGE_SIZE: usize = 0x4000; // 16KB
pub const CHR_PAGE_SIZE: usize = 0x2000; // 8KB
const HEADER_SIZE: usize = 16;

/// Nametable arrangement, fixed by a solder pad on the real cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
}

/// A parsed flat-layout (NROM) cartridge image.
///
/// PRG is 16KB or 32KB; CHR is either an 8KB ROM page or, when the header
/// declares none, 8KB of writable CHR RAM. Anything else is rejected.
pub struct Cartridge {
    pub prg: Box<[u8]>,
    pub chr: Box<[u8]>,
    pub chr_writable: bool,
    pub mirroring: Mirroring,
}

impl Cartridge {
    pub fn from_bytes(raw: &[u8]) -> Result<Cartridge, String> {
        if raw.len() < HEADER_SIZE || raw[0..4] != NES_TAG {
            return Err("file is not in iNES format".to_string());
        }

        let prg_pages = raw[4];
        let chr_pages = raw[5];
        let flags6 = raw[6];
        let flags7 = raw[7];

        // Battery, trainer and four-screen bits are all unsupported.
        if utils::bits(flags6, 1, 3) != 0 {
            return Err("unsupported iNES flags in header byte 6".to_string());
        }
        if utils::bits(flags7, 0, 2) != 0 {
            return Err("unsupported iNES flags in header byte 7".to_string());
        }

        let mapper = (flags7 & 0xF0) | (flags6 >> 4);
        if mapper != 0 {
            return Err(format!("mapper {} is not supported", mapper));
        }

        if !(prg_pages == 1 || prg_pages == 2) || chr_pages > 1 {
            return Err(format!(
                "unsupported ROM layout: {} PRG page(s), {} CHR page(s)",
                prg_pages, chr_pages
            ));
        }

        let mirroring = if utils::bit(flags6, 0) {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        let prg_size = prg_pages as usize * PRG_PAGE_SIZE;
        let chr_start = HEADER_SIZE + prg_size;
        let body_size = prg_size + chr_pages as usize * CHR_PAGE_SIZE;
        if raw.len() < HEADER_SIZE + body_size {
            return Err("file is shorter than its header declares".to_string());
        }

        // CHR page absent means the board carries 8KB of CHR RAM instead.
        let chr = if chr_pages == 0 {
            vec![0u8; CHR_PAGE_SIZE].into_boxed_slice()
        } else {
            Box::from(&raw[chr_start..chr_start + CHR_PAGE_SIZE])
        };

        log::trace!(
            "cartridge: {} PRG page(s), CHR {}, {:?} mirroring",
            prg_pages,
            if chr_pages == 0 { "RAM" } else { "ROM" },
            mirroring,
        );

        Ok(Cartridge {
            prg: Box::from(&raw[HEADER_SIZE..HEADER_SIZE + prg_size]),
            chr,
            chr_writable: chr_pages == 0,
            mirroring,
        })
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    pub struct TestImage {
        pub header: Vec<u8>,
        pub prg: Vec<u8>,
        pub chr: Vec<u8>,
    }

    pub fn build_image(image: TestImage) -> Vec<u8> {
        let mut result =
            Vec::with_capacity(image.header.len() + image.prg.len() + image.chr.len());
        result.extend(&image.header);
        result.extend(&image.prg);
        result.extend(&image.chr);
        result
    }

    /// 16KB PRG cartridge holding `program` at $8000, with RESET pointing at
    /// $8000 and NMI/IRQ pointing at $8100 (handy as a handler stub).
    pub fn test_cartridge(program: &[u8]) -> Cartridge {
        let mut prg = vec![0u8; PRG_PAGE_SIZE];
        prg[..program.len()].copy_from_slice(program);
        // Vectors live in the top six bytes of the mirrored 16KB page.
        prg[0x3FFA] = 0x00; // NMI -> $8100
        prg[0x3FFB] = 0x81;
        prg[0x3FFC] = 0x00; // RESET -> $8000
        prg[0x3FFD] = 0x80;
        prg[0x3FFE] = 0x00; // IRQ -> $8100
        prg[0x3FFF] = 0x81;

        let raw = build_image(TestImage {
            header: vec![
                0x4E, 0x45, 0x53, 0x1A, 0x01, 0x01, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0,
            ],
            prg,
            chr: vec![0; CHR_PAGE_SIZE],
        });
        Cartridge::from_bytes(&raw).unwrap()
    }

    fn plain_header(prg_pages: u8, chr_pages: u8, flags6: u8, flags7: u8) -> Vec<u8> {
        vec![
            0x4E, 0x45, 0x53, 0x1A, prg_pages, chr_pages, flags6, flags7, 0, 0, 0, 0, 0, 0, 0, 0,
        ]
    }

    #[test]
    fn loads_flat_32k_image() {
        let raw = build_image(TestImage {
            header: plain_header(2, 1, 0x01, 0x00),
            prg: vec![1; 2 * PRG_PAGE_SIZE],
            chr: vec![2; CHR_PAGE_SIZE],
        });
        let cart = Cartridge::from_bytes(&raw).unwrap();

        assert_eq!(cart.prg.len(), 2 * PRG_PAGE_SIZE);
        assert_eq!(cart.chr.len(), CHR_PAGE_SIZE);
        assert!(!cart.chr_writable);
        assert_eq!(cart.mirroring, Mirroring::Vertical);
    }

    #[test]
    fn missing_chr_page_becomes_chr_ram() {
        let raw = build_image(TestImage {
            header: plain_header(1, 0, 0x00, 0x00),
            prg: vec![1; PRG_PAGE_SIZE],
            chr: vec![],
        });
        let cart = Cartridge::from_bytes(&raw).unwrap();

        assert_eq!(cart.chr.len(), CHR_PAGE_SIZE);
        assert!(cart.chr.iter().all(|&b| b == 0));
        assert!(cart.chr_writable);
        assert_eq!(cart.mirroring, Mirroring::Horizontal);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut header = plain_header(1, 1, 0, 0);
        header[0] = 0x4D;
        let raw = build_image(TestImage {
            header,
            prg: vec![0; PRG_PAGE_SIZE],
            chr: vec![0; CHR_PAGE_SIZE],
        });
        assert!(Cartridge::from_bytes(&raw).is_err());
    }

    #[test]
    fn rejects_reserved_flag_bits() {
        for (flags6, flags7) in [(0x02, 0x00), (0x04, 0x00), (0x08, 0x00), (0x00, 0x01)] {
            let raw = build_image(TestImage {
                header: plain_header(1, 1, flags6, flags7),
                prg: vec![0; PRG_PAGE_SIZE],
                chr: vec![0; CHR_PAGE_SIZE],
            });
            assert!(Cartridge::from_bytes(&raw).is_err(), "{flags6:#x}/{flags7:#x}");
        }
    }

    #[test]
    fn rejects_nonzero_mapper() {
        let raw = build_image(TestImage {
            header: plain_header(1, 1, 0x10, 0x00),
            prg: vec![0; PRG_PAGE_SIZE],
            chr: vec![0; CHR_PAGE_SIZE],
        });
        assert!(Cartridge::from_bytes(&raw).is_err());
    }

    #[test]
    fn rejects_unsupported_sizes() {
        for (prg_pages, chr_pages) in [(0, 1), (3, 1), (1, 2)] {
            let raw = build_image(TestImage {
                header: plain_header(prg_pages, chr_pages, 0, 0),
                prg: vec![0; prg_pages as usize * PRG_PAGE_SIZE],
                chr: vec![0; chr_pages as usize * CHR_PAGE_SIZE],
            });
            assert!(Cartridge::from_bytes(&raw).is_err(), "{prg_pages}/{chr_pages}");
        }
    }

    #[test]
    fn rejects_truncated_body() {
        let raw = build_image(TestImage {
            header: plain_header(1, 1, 0, 0),
            prg: vec![0; PRG_PAGE_SIZE - 1],
            chr: vec![],
        });
        assert!(Cartridge::from_bytes(&raw).is_err());
    }
}
