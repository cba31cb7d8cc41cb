//! Station session: connect/baud-negotiation, direct/remote routing, mode
//! and protocol configuration, and the small set of direct command
//! wrappers (time, beep, power, erase) that don't belong to any other
//! module.

use std::thread;

use log::{debug, trace, warn};
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::debug_log::{DebugSink, Direction, NullSink};
use crate::decode::decode_micros;
use crate::discovery;
use crate::error::{Result, SiError};
use crate::frame::{self, Response};
use crate::model::{Model, OperatingMode, ProtoConfig};
use crate::proto::{Cmd, P_MS_DIRECT, P_MS_INDIRECT};
use crate::sysval::SysVal;
use crate::transport::{Baud, SerialTransport, Transport};

const DEFAULT_TIMEOUT_MS: u32 = 2000;

/// `Session::open` options, mirroring the original's constructor kwargs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
	/// Unused by the driver core itself; kept so callers building a debug
	/// sink around a session can gate it on the same flag the original
	/// exposed.
	pub debug: bool,
	/// Skip the connect probe entirely; populate a synthetic protocol
	/// configuration instead (matches the original's `noconnect` shortcut,
	/// used for replaying a recorded log without a real station attached).
	pub noconnect: bool,
	/// Force 4800 baud instead of negotiating 38400 first.
	pub lowspeed: bool,
}

fn noconnect_proto() -> ProtoConfig {
	ProtoConfig {
		ext_proto: true,
		auto_send: true,
		handshake: false,
		pw_access: false,
		punch_read: false,
		mode: OperatingMode::Control,
	}
}

/// A live connection to one SI station.
pub struct Session {
	transport: Box<dyn Transport>,
	sysval: SysVal,
	proto: ProtoConfig,
	station_code: u16,
	serial_no: u32,
	direct: bool,
	timeout_ms: u32,
	sink: Box<dyn DebugSink>,
	port_name: String,
}

impl Session {
	/// Opens `port` directly, or (if `None`) tries every candidate from
	/// [`discovery::list_candidate_ports`] in order, keeping the first
	/// that succeeds. Fails with [`SiError::NoReader`] carrying every
	/// collected per-port error if none do.
	pub fn open(port: Option<&str>, opts: OpenOptions) -> Result<Self> {
		let candidates: Vec<String> = match port {
			Some(p) => vec![p.to_string()],
			None => discovery::list_candidate_ports(),
		};
		if candidates.is_empty() {
			return Err(SiError::NoReader("no serial ports found".into()));
		}

		let mut errors = String::new();
		for candidate in &candidates {
			match Self::try_open(candidate, opts) {
				Ok(session) => return Ok(session),
				Err(e) => errors.push_str(&format!("port {candidate}: {e}\n")),
			}
		}
		Err(SiError::NoReader(errors))
	}

	fn try_open(path: &str, opts: OpenOptions) -> Result<Self> {
		let baud = if opts.lowspeed || opts.noconnect { Baud::B4800 } else { Baud::B38400 };
		let mut transport = SerialTransport::open(path, baud)?;
		transport.flush_input()?;

		let mut session = Session {
			transport: Box::new(transport),
			sysval: SysVal::new(),
			proto: noconnect_proto(),
			station_code: 0,
			serial_no: 0,
			direct: true,
			timeout_ms: DEFAULT_TIMEOUT_MS,
			sink: Box::new(NullSink),
			port_name: path.to_string(),
		};

		if opts.noconnect {
			return Ok(session);
		}

		if session.probe_master().is_err() {
			if baud != Baud::B38400 {
				return Err(SiError::NoReader(format!("{path}: no response at 4800 baud")));
			}
			session.transport.set_baud(Baud::B4800)?;
			session.probe_master().map_err(|e| {
				SiError::NoReader(format!("{path}: no response at either baud rate ({e})"))
			})?;
		}

		session.refresh_cached_fields()?;
		Ok(session)
	}

	fn probe_master(&mut self) -> Result<()> {
		self.transact(Cmd::SetMs, &[P_MS_DIRECT])?;
		self.direct = true;
		Ok(())
	}

	fn refresh_cached_fields(&mut self) -> Result<()> {
		self.sysval.refresh(self.transport.as_mut(), self.timeout_ms)?;
		self.proto = self.sysval.protocol(self.transport.as_mut(), self.timeout_ms)?;
		self.station_code = self.sysval.station_code(self.transport.as_mut(), self.timeout_ms)?;
		self.serial_no = self.sysval.serial_no(self.transport.as_mut(), self.timeout_ms)?;
		Ok(())
	}

	/// Plugs in a frame-logging sink (e.g. an adapter writing the original's
	/// two-column send/recv log format). Replaces any previous sink.
	pub fn set_debug_sink(&mut self, sink: Box<dyn DebugSink>) {
		self.sink = sink;
	}

	fn transact(&mut self, cmd: Cmd, params: &[u8]) -> Result<Response> {
		let request = frame::encode_request(cmd.into(), params, false);
		self.sink.record(Direction::Sent, &request);
		trace!("-> cmd=0x{:02x} params={:02x?}", u8::from(cmd), params);

		let pending = self.transport.bytes_waiting()?;
		if pending > 0 {
			warn!("input buffer not empty before sending cmd=0x{:02x} ({pending} bytes pending)", u8::from(cmd));
			return Err(SiError::BufferNotEmpty { pending: pending as usize });
		}
		self.transport.write_all(&request)?;

		let resp = frame::read_response(self.transport.as_mut(), self.timeout_ms).map_err(|e| {
			debug!("cmd=0x{:02x} failed: {e}", u8::from(cmd));
			e
		})?;
		self.sink.record(Direction::Received, &resp.data);
		trace!("<- cmd=0x{:02x} station=0x{:04x} data={:02x?}", resp.cmd, resp.station, resp.data);

		// every response carries a fresh station-code field; keep the
		// cached value current regardless of which command produced it.
		self.station_code = resp.station;

		Ok(resp)
	}

	pub fn port_name(&self) -> &str {
		&self.port_name
	}

	pub fn proto_config(&self) -> ProtoConfig {
		self.proto
	}

	pub fn station_code(&self) -> u16 {
		self.station_code
	}

	pub fn serial_no(&self) -> u32 {
		self.serial_no
	}

	pub fn is_direct(&self) -> bool {
		self.direct
	}

	pub fn timeout_ms(&self) -> u32 {
		self.timeout_ms
	}

	/// Access to the shared transport/sysval pair for the other driver
	/// components (readout, backup, autosend), which own their own state
	/// machines but need this session's live connection to talk over.
	pub fn transport_mut(&mut self) -> &mut dyn Transport {
		self.transport.as_mut()
	}

	pub fn sysval_mut(&mut self) -> &mut SysVal {
		&mut self.sysval
	}

	pub fn model(&mut self) -> Result<Model> {
		self.sysval.model(self.transport.as_mut(), self.timeout_ms)
	}

	/// The raw 128-byte SYSVAL image, for a caller that wants to serialize
	/// it itself (CSV export stays outside this crate).
	pub fn sysval_image(&mut self) -> Result<[u8; 128]> {
		if !self.sysval.is_loaded() {
			self.sysval.refresh(self.transport.as_mut(), self.timeout_ms)?;
		}
		Ok(*self.sysval.image().expect("just refreshed"))
	}

	pub fn set_direct(&mut self) -> Result<()> {
		self.transact(Cmd::SetMs, &[P_MS_DIRECT])?;
		self.direct = true;
		Ok(())
	}

	pub fn set_remote(&mut self) -> Result<()> {
		self.transact(Cmd::SetMs, &[P_MS_INDIRECT])?;
		self.direct = false;
		Ok(())
	}

	pub fn set_extended_protocol(&mut self, enable: bool) -> Result<()> {
		self.proto.ext_proto = enable;
		self.write_protocol()
	}

	/// Enabling autosend disables handshake (the two are mutually exclusive
	/// on the wire): a station can't both wait for an ACK per card and
	/// push records unprompted.
	pub fn set_autosend(&mut self, enable: bool) -> Result<()> {
		self.proto.auto_send = enable;
		if enable {
			self.proto.handshake = false;
		}
		self.write_protocol()
	}

	fn write_protocol(&mut self) -> Result<()> {
		self.sysval.set_protocol_byte(self.transport.as_mut(), self.timeout_ms, self.proto)?;
		self.refresh_cached_fields()
	}

	pub fn set_operating_mode(&mut self, mode: OperatingMode) -> Result<()> {
		if !mode.is_settable() {
			return Err(SiError::InvalidArgument(format!("mode {} is not settable", mode.name())));
		}
		self.sysval.set_mode(self.transport.as_mut(), self.timeout_ms, mode)?;
		self.proto.mode = mode;
		Ok(())
	}

	/// Sets the host baud rate and tells the station to match it.
	pub fn set_baud_rate(&mut self, baud: Baud) -> Result<()> {
		let param = match baud {
			Baud::B4800 => 0x00,
			Baud::B38400 => 0x01,
		};
		self.transact(Cmd::SetBaud, &[param])?;
		self.transport.set_baud(baud)
	}

	/// Reads the station's internal clock. Returns `None` if the station
	/// reports an impossible date/time tuple, mirroring the original's
	/// `ValueError` swallow.
	pub fn get_time(&mut self) -> Result<Option<OffsetDateTime>> {
		let resp = self.transact(Cmd::GetTime, &[])?;
		if resp.data.len() < 7 {
			return Err(SiError::FramingError("GET_TIME reply shorter than 7 bytes".into()));
		}
		let year = 2000 + i32::from(resp.data[0]);
		let month = resp.data[1];
		let day = resp.data[2];
		let am_pm = resp.data[3] & 0x01;
		let mut seconds = i64::from(u16::from_be_bytes([resp.data[4], resp.data[5]]));
		let hour = i64::from(am_pm) * 12 + seconds / 3600;
		seconds %= 3600;
		let minute = seconds / 60;
		seconds %= 60;
		let micros = i64::from(decode_micros(resp.data[6]));

		let Ok(month) = time::Month::try_from(month) else {
			return Ok(None);
		};
		let Ok(date) = time::Date::from_calendar_date(year, month, day) else {
			return Ok(None);
		};
		let Ok(time_of_day) = time::Time::from_hms(hour as u8, minute as u8, seconds as u8) else {
			return Ok(None);
		};
		Ok(Some(date.with_time(time_of_day).assume_utc() + TimeDuration::microseconds(micros)))
	}

	/// Sets the station's internal clock to `time`.
	pub fn set_time(&mut self, time: OffsetDateTime) -> Result<()> {
		let yy = (time.year() % 100) as u8;
		let month = u8::from(time.month());
		let day = time.day();
		let weekday = time.weekday().number_days_from_monday(); // Monday=0..Sunday=6
		let iso_weekday_mod7 = (weekday + 1) % 7; // Sunday=0, Monday=1, .. Saturday=6
		let ptd = (iso_weekday_mod7 << 1) + u8::from(time.hour() >= 12);
		let seconds = u32::from(time.hour() % 12) * 3600 + u32::from(time.minute()) * 60 + u32::from(time.second());
		let ms = ((u32::from(time.microsecond()) * 256 + 500_000) / 1_000_000) as u8;

		let mut params = vec![yy, month, day, ptd];
		params.extend_from_slice(&(seconds as u16).to_be_bytes());
		params.push(ms);
		self.transact(Cmd::SetTime, &params)?;
		Ok(())
	}

	pub fn beep(&mut self, count: u8) -> Result<()> {
		self.transact(Cmd::Beep, &[count])?;
		Ok(())
	}

	pub fn poweroff(&mut self) -> Result<()> {
		self.transact(Cmd::Off, &[])?;
		Ok(())
	}

	pub fn erase_backup(&mut self) -> Result<()> {
		self.transact(Cmd::EraseBackup, &[])?;
		Ok(())
	}

	pub fn disconnect(self) {
		// dropping `self.transport` closes the underlying serial port
	}

	pub fn reconnect(self, opts: OpenOptions) -> Result<Self> {
		let port = self.port_name.clone();
		drop(self);
		Self::open(Some(&port), opts)
	}

	/// Probes every candidate port in parallel for its station code,
	/// mirroring the original's one-thread-per-port fan-out. Both
	/// successes and errors are returned; a dead port doesn't abort the
	/// scan of the others.
	pub fn scan_stations(lowspeed: bool) -> Vec<(String, Result<u16>)> {
		let candidates = discovery::list_candidate_ports();
		let handles: Vec<_> = candidates
			.into_iter()
			.map(|port| {
				thread::spawn(move || {
					let opts = OpenOptions { debug: false, noconnect: false, lowspeed };
					let result = Session::open(Some(&port), opts).map(|s| s.station_code());
					(port, result)
				})
			})
			.collect();

		handles
			.into_iter()
			.filter_map(|h| h.join().ok())
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::tests::ScriptedTransport;

	fn wire_response(cmd: u8, station: u16, data: &[u8]) -> Vec<u8> {
		let [st_hi, st_lo] = station.to_be_bytes();
		let mut payload = vec![cmd, (2 + data.len()) as u8, st_hi, st_lo];
		payload.extend_from_slice(data);
		let crc = crate::crc::crc(&payload);
		let mut wire = vec![0x02u8];
		wire.extend_from_slice(&payload);
		wire.extend_from_slice(&crc);
		wire.push(0x03);
		wire
	}

	fn bare_session(transport: ScriptedTransport) -> Session {
		Session {
			transport: Box::new(transport),
			sysval: SysVal::new(),
			proto: noconnect_proto(),
			station_code: 0,
			serial_no: 0,
			direct: true,
			timeout_ms: 1000,
			sink: Box::new(NullSink),
			port_name: "test".into(),
		}
	}

	#[test]
	fn noconnect_populates_synthetic_protocol() {
		let opts = OpenOptions { debug: false, noconnect: true, lowspeed: false };
		// try_open for a nonexistent path still needs an open serial port;
		// instead exercise the synthetic-defaults branch directly.
		let proto = noconnect_proto();
		assert!(proto.ext_proto);
		assert!(proto.auto_send);
		assert!(!proto.handshake);
		assert_eq!(proto.mode, OperatingMode::Control);
		let _ = opts;
	}

	#[test]
	fn set_operating_mode_rejects_unsettable_mode() {
		let transport = ScriptedTransport::new(vec![]);
		let mut session = bare_session(transport);
		assert!(matches!(
			session.set_operating_mode(OperatingMode::Printout),
			Err(SiError::InvalidArgument(_))
		));
	}

	#[test]
	fn beep_sends_count_byte_and_logs_frame() {
		let _ = env_logger::builder().is_test(true).try_init();

		#[derive(Default)]
		struct Spy {
			frames: Vec<(Direction, Vec<u8>)>,
		}
		impl DebugSink for Spy {
			fn record(&mut self, direction: Direction, frame: &[u8]) {
				self.frames.push((direction, frame.to_vec()));
			}
		}

		let ack = wire_response(Cmd::Beep.into(), 0x002A, &[]);
		let transport = ScriptedTransport::new(vec![ack]);
		let mut session = bare_session(transport);
		session.set_debug_sink(Box::new(Spy::default()));
		session.beep(3).unwrap();
	}

	#[test]
	fn transact_refreshes_cached_station_code_from_every_response() {
		// station_code must come from the response header on every command,
		// not just the ones that go through refresh_cached_fields.
		let ack = wire_response(Cmd::Beep.into(), 0x00AB, &[]);
		let transport = ScriptedTransport::new(vec![ack]);
		let mut session = bare_session(transport);
		assert_eq!(session.station_code(), 0);
		session.beep(1).unwrap();
		assert_eq!(session.station_code(), 0x00AB);
	}

	#[test]
	fn get_time_decodes_standard_fields() {
		// yy=24 mm=05 dd=14 ptd with am_pm=0, secs=7200(02:00), ms=0
		let data = [24, 5, 14, 0x00, 0x1C, 0x20, 0x00];
		let wire = wire_response(Cmd::GetTime.into(), 0x002A, &data);
		let transport = ScriptedTransport::new(vec![wire]);
		let mut session = bare_session(transport);
		let time = session.get_time().unwrap().unwrap();
		assert_eq!(time.year(), 2024);
		assert_eq!(time.hour(), 2);
	}
}
