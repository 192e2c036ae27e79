/// Display mode the stream is encoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoMode {
    /// Hi-Res: single bitplane, 280x192, 40 byte columns of main memory.
    Hgr,
    /// Double Hi-Res: two interleaved bitplanes (AUX + MAIN banks), 560x192.
    Dhgr,
}

impl VideoMode {
    /// Mode tag byte carried in the stream header.
    pub fn tag(self) -> u8 {
        match self {
            VideoMode::Hgr => 0,
            VideoMode::Dhgr => 1,
        }
    }

    /// Uppercase name used in cache filenames and log output.
    pub fn name(self) -> &'static str {
        match self {
            VideoMode::Hgr => "HGR",
            VideoMode::Dhgr => "DHGR",
        }
    }

    /// Horizontal dot resolution of the mode.
    pub fn x_res(self) -> u32 {
        match self {
            VideoMode::Hgr => 280,
            VideoMode::Dhgr => 560,
        }
    }
}

/// Reference palette used to derive perceptual distances between dot colours.
///
/// The numeric ids match the palette numbers of the external frame converter
/// so the same value selects both the conversion and the distance model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Palette {
    /// Broadcast-style NTSC artifact colours.
    Ntsc,
    /// IIGS hardware RGB colours.
    Iigs,
}

impl Palette {
    pub fn id(self) -> u8 {
        match self {
            Palette::Ntsc => 5,
            Palette::Iigs => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Palette::Ntsc => "NTSC",
            Palette::Iigs => "IIGS",
        }
    }
}
