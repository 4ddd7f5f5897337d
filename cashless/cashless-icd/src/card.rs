use core::ops::BitOr;
use core::time::Duration;

use postcard_schema::Schema;
use serde::{Deserialize, Serialize};

pub const CARD_MAGNETIC: u8 = 1;
pub const CARD_CHIP: u8 = 2;
pub const CARD_CONTACTLESS: u8 = 4;

/// How long the payment kernel waits for a card to be presented
pub const CHECK_CARD_TIMEOUT: Duration = Duration::from_secs(60);

/// Card technologies a card check should look for.
#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Copy, Clone)]
pub struct CardTypeMask(u8);

impl CardTypeMask {
    pub const MAGNETIC: CardTypeMask = CardTypeMask(CARD_MAGNETIC);
    pub const CHIP: CardTypeMask = CardTypeMask(CARD_CHIP);
    pub const CONTACTLESS: CardTypeMask = CardTypeMask(CARD_CONTACTLESS);
    pub const ALL: CardTypeMask = CardTypeMask(CARD_MAGNETIC | CARD_CHIP | CARD_CONTACTLESS);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: CardTypeMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CardTypeMask {
    type Output = CardTypeMask;

    fn bitor(self, rhs: CardTypeMask) -> CardTypeMask {
        CardTypeMask(self.0 | rhs.0)
    }
}

//Track data as reported by the reader; any track may be unreadable
#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Clone, Default)]
pub struct MagCardInfo {
    pub track1: Option<String>,
    pub track2: Option<String>,
    pub track3: Option<String>,
}

#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Copy, Clone)]
pub enum CardTechnology {
    Magstripe,
    Chip,
    Contactless,
}

impl CardTechnology {
    pub fn is_contactless(self) -> bool {
        self == CardTechnology::Contactless
    }
}

/// What a single card check produced.
#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Clone)]
pub enum CardDetectionOutcome {
    Magstripe(MagCardInfo),
    ChipCard(String),        //Answer to reset
    ContactlessCard(String), //Card UUID
    DetectionError { code: i32, message: String },
}

impl CardDetectionOutcome {
    /// None when detection failed
    pub fn technology(&self) -> Option<CardTechnology> {
        match self {
            CardDetectionOutcome::Magstripe(_) => Some(CardTechnology::Magstripe),
            CardDetectionOutcome::ChipCard(_) => Some(CardTechnology::Chip),
            CardDetectionOutcome::ContactlessCard(_) => Some(CardTechnology::Contactless),
            CardDetectionOutcome::DetectionError { .. } => None,
        }
    }
}
