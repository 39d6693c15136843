//! The thirteen fixed page roles of a calendar photo-book.
//!
//! Every project descriptor stores its pages as a flat array indexed by slot
//! number. The merge config refers to slots by name, so this module is the
//! single place where names and indices meet:
//!
//! | Slot | Index |
//! |------|-------|
//! | `Cover` | 0 |
//! | `January` … `December` | 1 … 12 |
//!
//! Names are case-sensitive: `"january"` is not a slot.

use std::fmt;

/// One page role of a calendar project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CalendarSlot {
    Cover,
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl CalendarSlot {
    /// Number of slots in every project.
    pub const COUNT: usize = 13;

    /// All slots in page order.
    pub const ALL: [CalendarSlot; Self::COUNT] = [
        CalendarSlot::Cover,
        CalendarSlot::January,
        CalendarSlot::February,
        CalendarSlot::March,
        CalendarSlot::April,
        CalendarSlot::May,
        CalendarSlot::June,
        CalendarSlot::July,
        CalendarSlot::August,
        CalendarSlot::September,
        CalendarSlot::October,
        CalendarSlot::November,
        CalendarSlot::December,
    ];

    /// Parse a slot name exactly as written in the merge config.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.name() == name)
    }

    /// Position of this slot in a project's `pages` array.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            CalendarSlot::Cover => "Cover",
            CalendarSlot::January => "January",
            CalendarSlot::February => "February",
            CalendarSlot::March => "March",
            CalendarSlot::April => "April",
            CalendarSlot::May => "May",
            CalendarSlot::June => "June",
            CalendarSlot::July => "July",
            CalendarSlot::August => "August",
            CalendarSlot::September => "September",
            CalendarSlot::October => "October",
            CalendarSlot::November => "November",
            CalendarSlot::December => "December",
        }
    }

    pub fn is_cover(self) -> bool {
        self == CalendarSlot::Cover
    }
}

impl fmt::Display for CalendarSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
