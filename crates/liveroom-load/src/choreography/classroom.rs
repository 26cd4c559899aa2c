//! The live-classroom script: two teachers running a lesson with recording,
//! shared material, raised hands, a poll and whiteboard annotation.

use super::{Actor, Choreography, Crowd, Cue, Lane, Learners};
use crate::clients::{MaterialKind, RoomAction};
use std::time::Duration;

const FIRST_TEACHER: Actor = Actor::Teacher(0);
const SECOND_TEACHER: Actor = Actor::Teacher(1);

/// Students raising their hand together.
const RAISED_HANDS: usize = 7;
/// Of those, how many lower it again.
const LOWERED_HANDS: usize = 2;
/// Students first given the whiteboard.
const FIRST_ANNOTATORS: usize = 3;
const POLL_OPTIONS: u8 = 5;
const POLL_ANSWER: &str = "A";

/// Waits of the live-classroom script, modelling human and video timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPlan {
    /// Students look at the first shared PDF.
    pub read_pdf: Duration,
    /// Clicks of the student spamming the raise-hand button.
    pub hand_spam_clicks: u32,
    pub hand_spam_interval: Duration,
    /// The picked student answers after hands are lowered.
    pub answer_question: Duration,
    pub watch_video: Duration,
    pub video_paused: Duration,
    pub answer_poll: Duration,
    pub explain_poll: Duration,
    pub video_resumed: Duration,
    pub read_second_pdf: Duration,
    /// The first few annotators work on the whiteboard.
    pub small_group_annotation: Duration,
    /// Every student works on the whiteboard.
    pub class_annotation: Duration,
}

impl Default for PacingPlan {
    fn default() -> Self {
        Self {
            read_pdf: Duration::from_secs(9),
            hand_spam_clicks: 10,
            hand_spam_interval: Duration::from_millis(200),
            answer_question: Duration::from_secs(5),
            watch_video: Duration::from_secs(10),
            video_paused: Duration::from_secs(5),
            answer_poll: Duration::from_secs(10),
            explain_poll: Duration::from_secs(6),
            video_resumed: Duration::from_secs(5),
            read_second_pdf: Duration::from_secs(5),
            small_group_annotation: Duration::from_secs(10),
            class_annotation: Duration::from_secs(5),
        }
    }
}

impl PacingPlan {
    /// Every wait multiplied by `factor`. Click counts are unchanged.
    ///
    /// A factor that is negative or not finite leaves the plan as is.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        let scale = |d: Duration| Duration::try_from_secs_f64(d.as_secs_f64() * factor).unwrap_or(d);
        Self {
            read_pdf: scale(self.read_pdf),
            hand_spam_clicks: self.hand_spam_clicks,
            hand_spam_interval: scale(self.hand_spam_interval),
            answer_question: scale(self.answer_question),
            watch_video: scale(self.watch_video),
            video_paused: scale(self.video_paused),
            answer_poll: scale(self.answer_poll),
            explain_poll: scale(self.explain_poll),
            video_resumed: scale(self.video_resumed),
            read_second_pdf: scale(self.read_second_pdf),
            small_group_annotation: scale(self.small_group_annotation),
            class_annotation: scale(self.class_annotation),
        }
    }
}

fn share(kind: MaterialKind) -> RoomAction {
    RoomAction::ShareMaterial { kind }
}

impl Choreography {
    /// The live-classroom lesson.
    ///
    /// Needs two teachers and at least eight students, since the last student
    /// spams while the first seven raise their hands.
    pub fn live_classroom(pacing: PacingPlan) -> Self {
        Choreography::new()
            .act("first teacher starts recording", FIRST_TEACHER, RoomAction::StartRecording)
            .act("first teacher shares a pdf", FIRST_TEACHER, share(MaterialKind::Pdf))
            .refresh_all("attendees see the pdf")
            .pause("students read the pdf", pacing.read_pdf)
            .fan_out(
                "students raise hands while the last one spams",
                vec![
                    Lane::new(Crowd::FirstStudents(RAISED_HANDS), RoomAction::RaiseHand),
                    Lane::new(Crowd::One(Actor::LastStudent), RoomAction::RaiseHand)
                        .repeated(pacing.hand_spam_clicks, pacing.hand_spam_interval),
                ],
            )
            .fan_out(
                "some students lower their hands",
                vec![Lane::new(Crowd::FirstStudents(LOWERED_HANDS), RoomAction::LowerHand)],
            )
            .act("second teacher lowers all hands", SECOND_TEACHER, RoomAction::LowerAllHands)
            .pause("picked student answers", pacing.answer_question)
            .act("second teacher stops sharing", SECOND_TEACHER, RoomAction::StopSharing)
            .refresh_all("attendees see sharing stopped")
            .act("second teacher shares a video", SECOND_TEACHER, share(MaterialKind::Video))
            .refresh_all("attendees see the video")
            .pause("video plays", pacing.watch_video)
            .act("second teacher pauses the video", SECOND_TEACHER, RoomAction::PauseVideo)
            .refresh_all("attendees see the video paused")
            .pause("video stays paused", pacing.video_paused)
            .act(
                "first teacher opens a poll",
                FIRST_TEACHER,
                RoomAction::OpenPoll {
                    options: POLL_OPTIONS,
                },
            )
            .refresh_all("attendees see the poll")
            .fan_out(
                "all students answer the poll",
                vec![Lane::new(
                    Crowd::AllStudents,
                    RoomAction::SubmitPollAnswer {
                        answer: POLL_ANSWER.to_string(),
                    },
                )],
            )
            .pause("students finish answering", pacing.answer_poll)
            .act("first teacher stops the poll", FIRST_TEACHER, RoomAction::StopPoll)
            .refresh_all("attendees see the poll stopped")
            .pause("teacher explains the answer", pacing.explain_poll)
            .act("first teacher ends the poll", FIRST_TEACHER, RoomAction::EndPoll)
            .refresh_all("attendees see the poll ended")
            .act("second teacher resumes the video", SECOND_TEACHER, RoomAction::ResumeVideo)
            .refresh_all("attendees see the video resumed")
            .pause("video plays again", pacing.video_resumed)
            .act("second teacher stops the video", SECOND_TEACHER, RoomAction::StopVideo)
            .refresh_all("attendees see the video stopped")
            .act("second teacher shares a pdf", SECOND_TEACHER, share(MaterialKind::Pdf))
            .pause("students read the second pdf", pacing.read_second_pdf)
            .refresh_all("attendees see the second pdf")
            .act(
                "first teacher enables annotation for a few students",
                FIRST_TEACHER,
                Cue::EnableAnnotation(Learners::First(FIRST_ANNOTATORS)),
            )
            .pause("a few students annotate", pacing.small_group_annotation)
            .act(
                "second teacher enables annotation for all students",
                SECOND_TEACHER,
                Cue::EnableAnnotation(Learners::All),
            )
            .pause("the class annotates", pacing.class_annotation)
            .act(
                "first teacher disables annotation for all students",
                FIRST_TEACHER,
                Cue::DisableAnnotation(Learners::All),
            )
            .act("first teacher stops recording", FIRST_TEACHER, RoomAction::StopRecording)
            .act("first teacher ends the session", FIRST_TEACHER, RoomAction::EndSession)
    }
}
