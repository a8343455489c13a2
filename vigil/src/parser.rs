//! Parser for the text printed by the system `ping` program.

const SUMMARY_MARKER: &str = "packets transmitted";
const TIME_EQUALS: &str = "time=";
const TIME_BELOW: &str = "time<";

/// Round-trip summary from the optional `rtt min/avg/max/mdev = ...` line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RttSummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub mdev: f64,
}

/// Statistics extracted from one ping invocation.
///
/// Built by [`PingOutputParser::parse`]. When the input does not contain a
/// well-formed summary line, `is_valid_input` is false and every numeric
/// getter returns zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingOutputParser {
    valid: bool,
    transmitted: u32,
    received: u32,
    packet_loss: f64,
    rtt: Option<RttSummary>,
    times: Vec<f64>,
    below_resolution: u32,
}

impl PingOutputParser {
    pub fn parse(output: &str) -> Self {
        Self::try_parse(output).unwrap_or_default()
    }

    fn try_parse(output: &str) -> Option<Self> {
        let summary = output.lines().find(|line| line.contains(SUMMARY_MARKER))?;
        let (transmitted, received, packet_loss) = parse_summary(summary)?;

        let rtt = match output
            .lines()
            .find(|line| line.starts_with("rtt") || line.starts_with("round-trip"))
        {
            Some(line) => Some(parse_rtt(line)?),
            None => None,
        };

        let mut times = Vec::new();
        let mut below_resolution = 0;
        for line in output.lines() {
            if let Some(pos) = line.find(TIME_EQUALS) {
                if let Some(time) = leading_number(&line[pos + TIME_EQUALS.len()..]) {
                    times.push(time);
                }
            } else if line.contains(TIME_BELOW) {
                below_resolution += 1;
            }
        }

        Some(Self {
            valid: true,
            transmitted,
            received,
            packet_loss,
            rtt,
            times,
            below_resolution,
        })
    }

    pub fn is_valid_input(&self) -> bool {
        self.valid
    }

    pub fn packets_transmitted(&self) -> u32 {
        self.transmitted
    }

    pub fn packets_received(&self) -> u32 {
        self.received
    }

    pub fn packet_loss(&self) -> f64 {
        self.packet_loss
    }

    pub fn rtt(&self) -> Option<RttSummary> {
        self.rtt
    }

    /// Per-packet round trip times that carried a numeric value, in milliseconds.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn number_valid_times(&self) -> usize {
        self.times.len()
    }

    /// Replies seen per packet, including `time<N ms` replies without a usable value.
    pub fn number_times(&self) -> usize {
        self.times.len() + self.below_resolution as usize
    }

    /// Mean of the valid numeric times, zero if there are none.
    pub fn average_time(&self) -> f64 {
        if self.times.is_empty() {
            return 0.0;
        }
        self.times.iter().sum::<f64>() / self.times.len() as f64
    }
}

// "3 packets transmitted, 3 received, +1 errors, 0% packet loss, time 2003ms"
fn parse_summary(line: &str) -> Option<(u32, u32, f64)> {
    let mut transmitted = None;
    let mut received = None;
    let mut packet_loss = None;

    for part in line.split(',').map(str::trim) {
        if let Some(count) = part.strip_suffix(SUMMARY_MARKER) {
            transmitted = Some(count.trim().parse::<u32>().ok()?);
        } else if let Some(count) = part.strip_suffix("received") {
            received = Some(count.trim().parse::<u32>().ok()?);
        } else if let Some(loss) = part.strip_suffix("% packet loss") {
            packet_loss = Some(loss.trim().parse::<f64>().ok()?);
        }
    }

    Some((transmitted?, received?, packet_loss?))
}

// "rtt min/avg/max/mdev = 0.045/0.050/0.055/0.004 ms"
fn parse_rtt(line: &str) -> Option<RttSummary> {
    let (_, values) = line.split_once('=')?;
    let values = values.trim().trim_end_matches("ms").trim();
    let mut numbers = values.split('/').map(|v| v.trim().parse::<f64>());

    let summary = RttSummary {
        min: numbers.next()?.ok()?,
        avg: numbers.next()?.ok()?,
        max: numbers.next()?.ok()?,
        mdev: numbers.next()?.ok()?,
    };
    Some(summary)
}

fn leading_number(text: &str) -> Option<f64> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    text[..end].parse::<f64>().ok()
}
