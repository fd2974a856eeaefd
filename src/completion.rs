use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::lesson::ContentType;
use crate::models::progress::{ProgressRecord, ProgressStatus};

/// Partial signal payload for a progress update. Every field is optional so
/// that "not sent" and "explicitly zero" stay distinguishable: an omitted
/// field keeps the stored value, an explicit zero overwrites it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressSignals {
    pub video_progress: Option<i32>,
    pub documents_read: Option<i32>,
    pub total_documents: Option<i32>,
    /// Absolute total, not an increment. Kept monotone against the stored
    /// value so a stale resubmission cannot lower it.
    pub time_spent_minutes: Option<i32>,
}

fn document_percentage(documents_read: i32, total_documents: i32) -> f64 {
    if total_documents > 0 {
        documents_read as f64 / total_documents as f64 * 100.0
    } else {
        // Zero declared documents means zero progress, not a division fault.
        0.0
    }
}

/// Maps raw content signals to a normalized completion percentage.
///
/// `has_video` / `has_documents` describe the lesson's actually attached
/// media (a non-empty video reference, a non-empty document list) and only
/// matter for `mixed` content, where they select which signals participate
/// in the average.
///
/// Text lessons have no native progress signal; they fall back to the raw
/// video-progress value, which is 0 unless stale video data survives from an
/// earlier mixed configuration. See DESIGN.md before changing this.
pub fn compute_progress(
    content_type: ContentType,
    has_video: bool,
    has_documents: bool,
    video_progress: i32,
    documents_read: i32,
    total_documents: i32,
) -> i32 {
    let raw = match content_type {
        ContentType::Video => video_progress as f64,
        ContentType::Document => document_percentage(documents_read, total_documents),
        ContentType::Mixed => match (has_video, has_documents) {
            (true, true) => {
                let doc = document_percentage(documents_read, total_documents);
                (video_progress as f64 + doc) / 2.0
            }
            (true, false) => video_progress as f64,
            (false, true) => document_percentage(documents_read, total_documents),
            (false, false) => video_progress as f64,
        },
        ContentType::Text => video_progress as f64,
    };

    raw.round().clamp(0.0, 100.0) as i32
}

/// Merges a partial signal payload into the record and recomputes its state.
///
/// Provided signals are clamped into range rather than rejected; raw
/// counters take the supplied value verbatim after clamping, while the
/// completion percentage never moves backwards on this path (max of computed
/// and stored — only `reset` lowers it). `started_at` and `completed_at` are
/// each stamped at most once.
pub fn apply_update(
    record: &mut ProgressRecord,
    signals: &ProgressSignals,
    content_type: ContentType,
    has_video: bool,
    has_documents: bool,
    now: DateTime<Utc>,
) {
    if let Some(video_progress) = signals.video_progress {
        record.video_progress = video_progress.clamp(0, 100);
    }
    if let Some(documents_read) = signals.documents_read {
        record.documents_read = documents_read.max(0);
    }
    if let Some(total_documents) = signals.total_documents {
        record.total_documents = total_documents.max(0);
    }
    if let Some(time_spent_minutes) = signals.time_spent_minutes {
        record.time_spent_minutes = record.time_spent_minutes.max(time_spent_minutes.max(0));
    }

    let computed = compute_progress(
        content_type,
        has_video,
        has_documents,
        record.video_progress,
        record.documents_read,
        record.total_documents,
    );
    record.completion_percentage = record.completion_percentage.max(computed);

    if record.started_at.is_none() {
        record.started_at = Some(now);
    }

    if record.completion_percentage >= 100 {
        record.status = ProgressStatus::Completed;
        if record.completed_at.is_none() {
            record.completed_at = Some(now);
        }
    } else {
        record.status = ProgressStatus::InProgress;
    }
}

/// Incremental variant for callers that report elapsed minutes per request
/// instead of a running total.
pub fn add_time_spent(record: &mut ProgressRecord, minutes: i32) {
    record.time_spent_minutes = record.time_spent_minutes.saturating_add(minutes.max(0));
}

/// Explicit "mark as done": forces 100% regardless of computed signals.
pub fn mark_complete(record: &mut ProgressRecord, now: DateTime<Utc>) {
    record.completion_percentage = 100;
    record.status = ProgressStatus::Completed;
    if record.started_at.is_none() {
        record.started_at = Some(now);
    }
    if record.completed_at.is_none() {
        record.completed_at = Some(now);
    }
}

/// Returns the record to its freshly-created state. This is the only
/// operation allowed to lower the completion percentage or clear timestamps.
pub fn reset(record: &mut ProgressRecord) {
    record.status = ProgressStatus::NotStarted;
    record.completion_percentage = 0;
    record.video_progress = 0;
    record.documents_read = 0;
    record.total_documents = 0;
    record.time_spent_minutes = 0;
    record.started_at = None;
    record.completed_at = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fresh_record() -> ProgressRecord {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        ProgressRecord {
            id: 1,
            lesson_id: 10,
            student_user_id: 20,
            status: ProgressStatus::NotStarted,
            completion_percentage: 0,
            video_progress: 0,
            documents_read: 0,
            total_documents: 0,
            time_spent_minutes: 0,
            started_at: None,
            completed_at: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, hour, 0, 0).unwrap()
    }

    #[test]
    fn video_progress_passes_through() {
        assert_eq!(compute_progress(ContentType::Video, true, false, 73, 0, 0), 73);
        assert_eq!(compute_progress(ContentType::Video, true, false, 0, 0, 0), 0);
        assert_eq!(compute_progress(ContentType::Video, true, false, 100, 0, 0), 100);
    }

    #[test]
    fn video_progress_is_clamped() {
        assert_eq!(compute_progress(ContentType::Video, true, false, 140, 0, 0), 100);
        assert_eq!(compute_progress(ContentType::Video, true, false, -5, 0, 0), 0);
    }

    #[test]
    fn document_progress_is_a_rounded_ratio() {
        assert_eq!(compute_progress(ContentType::Document, false, true, 0, 3, 6), 50);
        assert_eq!(compute_progress(ContentType::Document, false, true, 0, 1, 3), 33);
        assert_eq!(compute_progress(ContentType::Document, false, true, 0, 2, 3), 67);
        assert_eq!(compute_progress(ContentType::Document, false, true, 0, 3, 3), 100);
    }

    #[test]
    fn zero_declared_documents_yields_zero() {
        assert_eq!(compute_progress(ContentType::Document, false, true, 0, 0, 0), 0);
        // Reads reported against an undeclared total still count for nothing.
        assert_eq!(compute_progress(ContentType::Document, false, true, 0, 4, 0), 0);
    }

    #[test]
    fn mixed_with_both_media_averages_the_signals() {
        assert_eq!(compute_progress(ContentType::Mixed, true, true, 100, 2, 4), 75);
        assert_eq!(compute_progress(ContentType::Mixed, true, true, 50, 0, 0), 25);
        assert_eq!(compute_progress(ContentType::Mixed, true, true, 0, 1, 2), 25);
        // round half away from zero: (25 + 50) / 2 = 37.5 -> 38
        assert_eq!(compute_progress(ContentType::Mixed, true, true, 25, 1, 2), 38);
    }

    #[test]
    fn mixed_with_one_medium_uses_that_signal_alone() {
        assert_eq!(compute_progress(ContentType::Mixed, true, false, 60, 5, 5), 60);
        assert_eq!(compute_progress(ContentType::Mixed, false, true, 60, 1, 4), 25);
    }

    #[test]
    fn mixed_with_no_media_falls_back_to_video_signal() {
        assert_eq!(compute_progress(ContentType::Mixed, false, false, 0, 0, 0), 0);
        assert_eq!(compute_progress(ContentType::Mixed, false, false, 40, 0, 0), 40);
    }

    #[test]
    fn text_content_reports_the_video_fallback() {
        // Documented quirk: text lessons have no signal of their own, so a
        // pure text lesson stays at 0 and stale video data leaks through.
        assert_eq!(compute_progress(ContentType::Text, false, false, 0, 0, 0), 0);
        assert_eq!(compute_progress(ContentType::Text, false, false, 55, 3, 3), 55);
    }

    #[test]
    fn first_update_stamps_started_at_and_moves_to_in_progress() {
        let mut record = fresh_record();
        let signals = ProgressSignals {
            video_progress: Some(50),
            ..Default::default()
        };
        apply_update(&mut record, &signals, ContentType::Mixed, true, true, at(9));

        assert_eq!(record.status, ProgressStatus::InProgress);
        assert_eq!(record.completion_percentage, 25);
        assert_eq!(record.started_at, Some(at(9)));
        assert_eq!(record.completed_at, None);
    }

    #[test]
    fn started_at_is_never_overwritten() {
        let mut record = fresh_record();
        let signals = ProgressSignals {
            video_progress: Some(10),
            ..Default::default()
        };
        apply_update(&mut record, &signals, ContentType::Video, true, false, at(9));
        apply_update(&mut record, &signals, ContentType::Video, true, false, at(11));
        assert_eq!(record.started_at, Some(at(9)));
    }

    #[test]
    fn omitted_signals_keep_stored_values() {
        let mut record = fresh_record();
        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(80),
                time_spent_minutes: Some(12),
                ..Default::default()
            },
            ContentType::Video,
            true,
            false,
            at(9),
        );
        // A later update that says nothing about video keeps the 80.
        apply_update(
            &mut record,
            &ProgressSignals {
                documents_read: Some(1),
                ..Default::default()
            },
            ContentType::Video,
            true,
            false,
            at(10),
        );
        assert_eq!(record.video_progress, 80);
        assert_eq!(record.completion_percentage, 80);
        assert_eq!(record.time_spent_minutes, 12);
    }

    #[test]
    fn explicit_zero_overwrites_a_counter_but_percentage_holds() {
        let mut record = fresh_record();
        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(60),
                ..Default::default()
            },
            ContentType::Video,
            true,
            false,
            at(9),
        );
        // Stale client resubmits zero: the raw counter takes it, the
        // normalized percentage does not move backwards.
        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(0),
                ..Default::default()
            },
            ContentType::Video,
            true,
            false,
            at(10),
        );
        assert_eq!(record.video_progress, 0);
        assert_eq!(record.completion_percentage, 60);
        assert_eq!(record.status, ProgressStatus::InProgress);
    }

    #[test]
    fn out_of_range_signals_are_clamped_before_merging() {
        let mut record = fresh_record();
        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(250),
                documents_read: Some(-3),
                total_documents: Some(-1),
                time_spent_minutes: Some(-10),
            },
            ContentType::Video,
            true,
            false,
            at(9),
        );
        assert_eq!(record.video_progress, 100);
        assert_eq!(record.documents_read, 0);
        assert_eq!(record.total_documents, 0);
        assert_eq!(record.time_spent_minutes, 0);
    }

    #[test]
    fn time_spent_is_monotone_under_absolute_updates() {
        let mut record = fresh_record();
        let mk = |minutes| ProgressSignals {
            time_spent_minutes: Some(minutes),
            ..Default::default()
        };
        apply_update(&mut record, &mk(30), ContentType::Text, false, false, at(9));
        apply_update(&mut record, &mk(12), ContentType::Text, false, false, at(10));
        assert_eq!(record.time_spent_minutes, 30);
        apply_update(&mut record, &mk(45), ContentType::Text, false, false, at(11));
        assert_eq!(record.time_spent_minutes, 45);
    }

    #[test]
    fn add_time_spent_increments() {
        let mut record = fresh_record();
        add_time_spent(&mut record, 15);
        add_time_spent(&mut record, 5);
        assert_eq!(record.time_spent_minutes, 20);
        add_time_spent(&mut record, -7);
        assert_eq!(record.time_spent_minutes, 20);
    }

    #[test]
    fn reaching_100_completes_and_stamps_completed_at_once() {
        let mut record = fresh_record();
        let full = ProgressSignals {
            video_progress: Some(100),
            ..Default::default()
        };
        apply_update(&mut record, &full, ContentType::Video, true, false, at(9));
        assert_eq!(record.status, ProgressStatus::Completed);
        assert_eq!(record.completion_percentage, 100);
        assert_eq!(record.completed_at, Some(at(9)));

        // Same inputs again: completed_at must not move.
        apply_update(&mut record, &full, ContentType::Video, true, false, at(14));
        assert_eq!(record.completed_at, Some(at(9)));
        assert_eq!(record.status, ProgressStatus::Completed);
    }

    #[test]
    fn completed_record_stays_completed_on_lower_signals() {
        let mut record = fresh_record();
        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(100),
                ..Default::default()
            },
            ContentType::Video,
            true,
            false,
            at(9),
        );
        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(30),
                ..Default::default()
            },
            ContentType::Video,
            true,
            false,
            at(10),
        );
        assert_eq!(record.completion_percentage, 100);
        assert_eq!(record.status, ProgressStatus::Completed);
    }

    #[test]
    fn mark_complete_forces_full_completion() {
        let mut record = fresh_record();
        mark_complete(&mut record, at(9));
        assert_eq!(record.status, ProgressStatus::Completed);
        assert_eq!(record.completion_percentage, 100);
        assert_eq!(record.started_at, Some(at(9)));
        assert_eq!(record.completed_at, Some(at(9)));

        mark_complete(&mut record, at(16));
        assert_eq!(record.completed_at, Some(at(9)));
    }

    #[test]
    fn reset_returns_the_record_to_pristine_state() {
        let mut record = fresh_record();
        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(100),
                documents_read: Some(2),
                total_documents: Some(2),
                time_spent_minutes: Some(90),
            },
            ContentType::Mixed,
            true,
            true,
            at(9),
        );
        assert_eq!(record.status, ProgressStatus::Completed);

        reset(&mut record);
        let pristine = fresh_record();
        assert_eq!(record.status, pristine.status);
        assert_eq!(record.completion_percentage, 0);
        assert_eq!(record.video_progress, 0);
        assert_eq!(record.documents_read, 0);
        assert_eq!(record.total_documents, 0);
        assert_eq!(record.time_spent_minutes, 0);
        assert_eq!(record.started_at, None);
        assert_eq!(record.completed_at, None);
    }

    #[test]
    fn mixed_lesson_progression_end_to_end() {
        // Lesson: mixed content, one video, three documents.
        let mut record = fresh_record();
        assert_eq!(record.status, ProgressStatus::NotStarted);
        assert_eq!(record.completion_percentage, 0);

        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(50),
                ..Default::default()
            },
            ContentType::Mixed,
            true,
            true,
            at(9),
        );
        assert_eq!(record.completion_percentage, 25);
        assert_eq!(record.status, ProgressStatus::InProgress);
        assert_eq!(record.started_at, Some(at(9)));

        apply_update(
            &mut record,
            &ProgressSignals {
                documents_read: Some(3),
                total_documents: Some(3),
                ..Default::default()
            },
            ContentType::Mixed,
            true,
            true,
            at(10),
        );
        assert_eq!(record.completion_percentage, 75);
        assert_eq!(record.status, ProgressStatus::InProgress);
        assert_eq!(record.completed_at, None);

        apply_update(
            &mut record,
            &ProgressSignals {
                video_progress: Some(100),
                ..Default::default()
            },
            ContentType::Mixed,
            true,
            true,
            at(11),
        );
        assert_eq!(record.completion_percentage, 100);
        assert_eq!(record.status, ProgressStatus::Completed);
        assert_eq!(record.completed_at, Some(at(11)));
    }
}
