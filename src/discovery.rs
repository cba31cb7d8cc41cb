//! Candidate serial port discovery, generalizing `guess_serial_ports`'s
//! per-OS heuristics into one cross-platform ranking over whatever
//! `serialport::available_ports()` reports.

use log::warn;

/// Lists candidate ports for an SI station, most-likely first.
///
/// The original special-cased Linux (`ttyUSB*`/`ttyS*` globbing), macOS
/// (`tty.SLAB*`) and Windows (a manufacturer/vendor-string ranking). The
/// `serialport` crate already enumerates ports uniformly across
/// platforms, so only the Windows ranking heuristic survives here,
/// applied everywhere: a vendor/product string naming "sportident" sorts
/// first, bare `COM1` sorts last (it is often an inaccessible legacy port
/// on modern hardware).
pub fn list_candidate_ports() -> Vec<String> {
	let ports = match serialport::available_ports() {
		Ok(ports) => ports,
		Err(e) => {
			warn!("failed to enumerate serial ports: {e}");
			return Vec::new();
		}
	};

	let mut ranked: Vec<(i32, String)> = ports
		.into_iter()
		.map(|p| (score_port(&p.port_name, &p.port_type), p.port_name))
		.collect();

	ranked.sort_by_key(|(score, _)| -score);
	ranked.into_iter().map(|(_, name)| name).collect()
}

fn score_port(port_name: &str, port_type: &serialport::SerialPortType) -> i32 {
	let mut score = 0;
	if port_name == "COM1" {
		score -= 1;
	}
	if let serialport::SerialPortType::UsbPort(usb) = port_type {
		let product = usb.product.as_deref().unwrap_or("").to_lowercase();
		let manufacturer = usb.manufacturer.as_deref().unwrap_or("").to_lowercase();
		if product.contains("sportident") || manufacturer.contains("sportident") {
			score += 10;
		}
	}
	score
}
