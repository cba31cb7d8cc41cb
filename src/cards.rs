//! SI-Card data model: per-family byte-offset layouts and the decoder that
//! turns an assembled raw card image into a [`CardRecord`].
//!
//! Layouts are a static table rather than the dynamic per-name dictionary
//! the original driver used — one variant per family, carrying `Option`
//! offsets for fields a given family doesn't store.

use time::OffsetDateTime;

use crate::decode::{decode_card_number, decode_station_code, decode_time};
use crate::error::Result;

/// SI-Card family, identified during card-insert detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardFamily {
	Si5,
	Si6,
	Si8,
	Si9,
	Si10,
	PCard,
}

impl CardFamily {
	/// Classifies the numeric range reported by a `C_SI9_DET` event, which
	/// covers SI8/SI9/SI10/SI11/pCard behind one frame type.
	pub fn from_si9_range(card_number: u32) -> Option<Self> {
		match card_number {
			1_000_000..=1_999_999 => Some(Self::Si9),
			2_000_000..=2_999_999 => Some(Self::Si8),
			4_000_000..=4_999_999 => Some(Self::PCard),
			7_000_000..=9_999_999 => Some(Self::Si10),
			_ => None,
		}
	}
}

/// Fixed byte-offset layout for one card family. Offsets are relative to
/// the start of the assembled (filler-stripped) card image; `None` marks a
/// field the family doesn't store.
struct Layout {
	cn2: usize,
	cn1: usize,
	cn0: usize,
	std: Option<usize>,
	sn: Option<usize>,
	st: usize,
	ftd: Option<usize>,
	fn_: Option<usize>,
	ft: usize,
	ctd: Option<usize>,
	chn: Option<usize>,
	ct: usize,
	ltd: Option<usize>,
	ln: Option<usize>,
	lt: Option<usize>,
	rc: usize,
	p1: usize,
	pl: usize,
	pm: usize,
	cn: usize,
	ptd: Option<usize>,
	pth: usize,
	ptl: usize,
}

fn layout(family: CardFamily) -> Layout {
	match family {
		CardFamily::Si5 => Layout {
			cn2: 6, cn1: 4, cn0: 5,
			std: None, sn: None, st: 19,
			ftd: None, fn_: None, ft: 21,
			ctd: None, chn: None, ct: 25,
			ltd: None, ln: None, lt: None,
			rc: 23,
			p1: 32, pl: 3, pm: 30,
			cn: 0, ptd: None, pth: 1, ptl: 2,
		},
		CardFamily::Si6 => Layout {
			cn2: 11, cn1: 12, cn0: 13,
			std: Some(24), sn: Some(25), st: 26,
			ftd: Some(20), fn_: Some(21), ft: 22,
			ctd: Some(28), chn: Some(29), ct: 30,
			ltd: Some(32), ln: Some(33), lt: Some(34),
			rc: 18,
			p1: 128, pl: 4, pm: 64,
			cn: 1, ptd: Some(0), pth: 2, ptl: 3,
		},
		CardFamily::Si8 => Layout {
			cn2: 25, cn1: 26, cn0: 27,
			std: Some(12), sn: Some(13), st: 14,
			ftd: Some(16), fn_: Some(17), ft: 18,
			ctd: Some(8), chn: Some(9), ct: 10,
			ltd: None, ln: None, lt: None,
			rc: 22,
			p1: 136, pl: 4, pm: 50,
			cn: 1, ptd: Some(0), pth: 2, ptl: 3,
		},
		CardFamily::Si9 => Layout {
			cn2: 25, cn1: 26, cn0: 27,
			std: Some(12), sn: Some(13), st: 14,
			ftd: Some(16), fn_: Some(17), ft: 18,
			ctd: Some(8), chn: Some(9), ct: 10,
			ltd: None, ln: None, lt: None,
			rc: 22,
			p1: 56, pl: 4, pm: 50,
			cn: 1, ptd: Some(0), pth: 2, ptl: 3,
		},
		CardFamily::PCard => Layout {
			cn2: 25, cn1: 26, cn0: 27,
			std: Some(12), sn: Some(13), st: 14,
			ftd: Some(16), fn_: Some(17), ft: 18,
			ctd: Some(8), chn: Some(9), ct: 10,
			ltd: None, ln: None, lt: None,
			rc: 22,
			p1: 176, pl: 4, pm: 20,
			cn: 1, ptd: Some(0), pth: 2, ptl: 3,
		},
		CardFamily::Si10 => Layout {
			cn2: 25, cn1: 26, cn0: 27,
			std: Some(12), sn: Some(13), st: 14,
			ftd: Some(16), fn_: Some(17), ft: 18,
			ctd: Some(8), chn: Some(9), ct: 10,
			ltd: None, ln: None, lt: None,
			rc: 22,
			// would be 512 if every block were read, but the readout state
			// machine skips the station's internal blocks 1..3 (see G.read)
			p1: 128, pl: 4, pm: 64,
			cn: 1, ptd: Some(0), pth: 2, ptl: 3,
		},
	}
}

/// Number of `GET_SI9` blocks to request for families read that way.
pub fn block_count(family: CardFamily) -> u8 {
	match family {
		CardFamily::Si8 | CardFamily::Si9 | CardFamily::PCard => 2,
		CardFamily::Si10 => 8,
		CardFamily::Si5 | CardFamily::Si6 => 0,
	}
}

/// One punch in a decoded card's punch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Punch {
	pub station_code: u16,
	pub time: OffsetDateTime,
}

/// A fully decoded SI-Card.
#[derive(Debug, Clone)]
pub struct CardRecord {
	pub card_number: u32,
	pub start: Option<OffsetDateTime>,
	pub start_code: Option<u16>,
	pub finish: Option<OffsetDateTime>,
	pub finish_code: Option<u16>,
	pub check: Option<OffsetDateTime>,
	pub check_code: Option<u16>,
	pub clear: Option<OffsetDateTime>,
	pub clear_code: Option<u16>,
	pub punches: Vec<Punch>,
}

fn decode_event(
	data: &[u8],
	day_offset: Option<usize>,
	code_offset: Option<usize>,
	time_offset: usize,
	reftime: OffsetDateTime,
) -> (Option<OffsetDateTime>, Option<u16>) {
	let day_byte = day_offset.map(|o| data[o]);
	let time = decode_time([data[time_offset], data[time_offset + 1]], day_byte, reftime);
	let code = code_offset.map(|o| decode_station_code(data[o], day_byte));
	(time, code)
}

/// Decodes an assembled card image for `family` into a [`CardRecord`].
pub fn decode_card_data(data: &[u8], family: CardFamily, reftime: OffsetDateTime) -> Result<CardRecord> {
	let l = layout(family);

	let card_number = decode_card_number([0, data[l.cn2], data[l.cn1], data[l.cn0]])?;

	let (start, start_code) = decode_event(data, l.std, l.sn, l.st, reftime);
	let (finish, finish_code) = decode_event(data, l.ftd, l.fn_, l.ft, reftime);
	let (check, check_code) = decode_event(data, l.ctd, l.chn, l.ct, reftime);
	let (clear, clear_code) = match l.lt {
		Some(lt) => decode_event(data, l.ltd, l.ln, lt, reftime),
		None => (None, None),
	};

	let mut punch_count = usize::from(data[l.rc]);
	if matches!(family, CardFamily::Si5) {
		punch_count = punch_count.saturating_sub(1);
	}
	punch_count = punch_count.min(l.pm);

	let mut punches = Vec::with_capacity(punch_count);
	let mut i = l.p1;
	let mut p = 0;
	while p < punch_count {
		if matches!(family, CardFamily::Si5) && i % 16 == 0 {
			// first byte of each SI5 block is reserved for punches 31..36
			i += 1;
		}

		let ptd = l.ptd.map(|o| data[i + o]);
		let station_code = decode_station_code(data[i + l.cn], ptd);
		let raw_time = [data[i + l.pth], data[i + l.ptl]];
		if let Some(time) = decode_time(raw_time, ptd, reftime) {
			punches.push(Punch { station_code, time });
		}

		i += l.pl;
		p += 1;
	}

	Ok(CardRecord {
		card_number,
		start,
		start_code,
		finish,
		finish_code,
		check,
		check_code,
		clear,
		clear_code,
		punches,
	})
}
