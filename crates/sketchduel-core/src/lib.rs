pub mod names;
pub mod net;
pub mod room;
pub mod session;
pub mod stroke;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::net::messages::{
        ClientMessage, DrawStrokeMsg, LiveStroke, Point, SubmitTurnMsg, TurnStroke,
    };

    /// A short valid live stroke with the given id.
    pub fn make_live_stroke(id: &str) -> LiveStroke {
        LiveStroke {
            id: id.to_string(),
            path: "M 10 10 L 20 25 L 40 30".to_string(),
            color: "#1e90ff".to_string(),
            stroke_width: 4.0,
        }
    }

    /// `n` valid committed strokes, each a two-point segment.
    pub fn make_turn_strokes(n: usize) -> Vec<TurnStroke> {
        (0..n)
            .map(|i| {
                let offset = i as f64 * 5.0;
                TurnStroke {
                    points: vec![
                        Point {
                            x: offset,
                            y: offset,
                        },
                        Point {
                            x: offset + 10.0,
                            y: offset + 3.0,
                        },
                    ],
                    color: "#000000".to_string(),
                    width: 2.0,
                }
            })
            .collect()
    }

    pub fn draw_stroke_msg(id: &str) -> ClientMessage {
        ClientMessage::DrawStroke(DrawStrokeMsg {
            stroke: make_live_stroke(id),
        })
    }

    pub fn submit_turn_msg(n: usize, round: Option<u32>) -> ClientMessage {
        ClientMessage::SubmitTurn(SubmitTurnMsg {
            strokes: make_turn_strokes(n),
            round,
        })
    }

}
