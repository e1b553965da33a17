//! Parser for the line protocol carrying tracker measurements.
//!
//! One message per line:
//!
//! ```text
//! +HTRK:<timestamp_ms>,<m00>,<m01>,<m02>,<m10>,<m11>,<m12>,<m20>,<m21>,<m22>
//! +HPAR:<tau>,<r_scalar>,<q_scalar>     (any field may be empty)
//! +HMAN:<x>,<y>,<z>,<w>
//! +HSTART
//! +HSTOP
//! ```

use crate::eskf::TuningParams;
use crate::estimator::TrackerMessage;
use crate::quat::Quat;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, space0},
    combinator::{all_consuming, map, opt, value},
    error::Error,
    number::complete::double,
    sequence::{delimited, preceded, tuple},
    Finish, IResult,
};

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputLine {
    Frame {
        timestamp_ms: f64,
        rotation: [f32; 9],
    },
    Params(TuningParams),
    Manual(Quat),
    Start,
    Stop,
}

impl InputLine {
    pub fn into_message(self) -> TrackerMessage {
        match self {
            InputLine::Frame {
                timestamp_ms,
                rotation,
            } => TrackerMessage::ProcessFrame {
                rotation,
                timestamp_ms,
            },
            InputLine::Params(params) => TrackerMessage::UpdateParams(params),
            InputLine::Manual(q) => TrackerMessage::SetManualOrientation(q),
            InputLine::Start => TrackerMessage::StartTracking,
            InputLine::Stop => TrackerMessage::StopTracking,
        }
    }
}

fn number(s: &str) -> IResult<&str, f64> {
    delimited(space0, double, space0)(s)
}

fn next_number(s: &str) -> IResult<&str, f64> {
    preceded(char(','), number)(s)
}

fn optional_number(s: &str) -> IResult<&str, Option<f64>> {
    delimited(space0, opt(double), space0)(s)
}

fn parse_frame(s: &str) -> IResult<&str, InputLine> {
    map(
        tuple((
            preceded(tag("+HTRK:"), number),
            next_number,
            next_number,
            next_number,
            next_number,
            next_number,
            next_number,
            next_number,
            next_number,
            next_number,
        )),
        |(timestamp_ms, m00, m01, m02, m10, m11, m12, m20, m21, m22)| InputLine::Frame {
            timestamp_ms,
            rotation: [m00, m01, m02, m10, m11, m12, m20, m21, m22].map(|v| v as f32),
        },
    )(s)
}

fn parse_params(s: &str) -> IResult<&str, InputLine> {
    map(
        tuple((
            preceded(tag("+HPAR:"), optional_number),
            preceded(char(','), optional_number),
            preceded(char(','), optional_number),
        )),
        |(tau, r_scalar, q_scalar)| {
            InputLine::Params(TuningParams {
                tau,
                r_scalar,
                q_scalar,
            })
        },
    )(s)
}

fn parse_manual(s: &str) -> IResult<&str, InputLine> {
    map(
        tuple((
            preceded(tag("+HMAN:"), number),
            next_number,
            next_number,
            next_number,
        )),
        |(x, y, z, w)| InputLine::Manual(Quat::new(x, y, z, w)),
    )(s)
}

fn parse_input_line(s: &str) -> IResult<&str, InputLine> {
    alt((
        parse_frame,
        parse_params,
        parse_manual,
        value(InputLine::Start, tag("+HSTART")),
        value(InputLine::Stop, tag("+HSTOP")),
    ))(s)
}

impl FromStr for InputLine {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(parse_input_line)(s.trim()).finish() {
            Ok((_remaining, line)) => Ok(line),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}
