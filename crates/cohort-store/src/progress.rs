//! Progress accumulation, room analytics, quiz leaderboards and streaks.
//!
//! Every write here is one upsert statement: counters are added inside the
//! `ON CONFLICT` clause and best-of values use SQL `max()` / `min()`, so
//! concurrent submissions never lose an update.

use chrono::{Duration, NaiveDate};
use cohort_shared::constants::LEADERBOARD_LIMIT;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{
    LeaderboardEntry, ProgressRecord, RoomAnalytics, SkillStats, Streak, UserSkillAnalytics,
};
use crate::rows;

impl Database {
    /// Fold one batch of answers into the (room, skill, user) accumulator.
    ///
    /// `mastery` overwrites the stored estimate; `None` (estimator
    /// unavailable) keeps the previous one.
    pub fn record_progress(
        &self,
        room_id: Uuid,
        skill_id: &str,
        user_id: Uuid,
        mastery: Option<f64>,
        questions: u32,
        correct: u32,
    ) -> Result<ProgressRecord> {
        let skill_id = skill_id.trim();
        if skill_id.is_empty() {
            return Err(StoreError::Invalid("skill_id is empty".into()));
        }
        if correct > questions {
            return Err(StoreError::Invalid(format!(
                "{correct} correct answers out of {questions} questions"
            )));
        }
        if let Some(m) = mastery {
            if !(0.0..=1.0).contains(&m) {
                return Err(StoreError::Invalid(format!("mastery {m} outside [0, 1]")));
            }
        }
        self.require_room(room_id)?;
        self.require_member(room_id, user_id, "only members record progress")?;

        self.conn().execute(
            "INSERT INTO group_progress
                 (room_id, skill_id, user_id, mastery_score, questions_answered,
                  correct_answers, last_updated)
             VALUES (?1, ?2, ?3, COALESCE(?4, 0), ?5, ?6, ?7)
             ON CONFLICT(room_id, skill_id, user_id) DO UPDATE SET
                 mastery_score      = COALESCE(?4, group_progress.mastery_score),
                 questions_answered = group_progress.questions_answered + excluded.questions_answered,
                 correct_answers    = group_progress.correct_answers + excluded.correct_answers,
                 last_updated       = excluded.last_updated",
            params![
                room_id.to_string(),
                skill_id,
                user_id.to_string(),
                mastery,
                questions,
                correct,
                rows::now(),
            ],
        )?;

        self.conn()
            .query_row(
                "SELECT room_id, skill_id, user_id, mastery_score, questions_answered,
                        correct_answers, last_updated
                 FROM group_progress
                 WHERE room_id = ?1 AND skill_id = ?2 AND user_id = ?3",
                params![room_id.to_string(), skill_id, user_id.to_string()],
                |row| {
                    Ok(ProgressRecord {
                        room_id: rows::uuid_at(row, 0)?,
                        skill_id: row.get(1)?,
                        user_id: rows::uuid_at(row, 2)?,
                        mastery_score: row.get(3)?,
                        questions_answered: row.get(4)?,
                        correct_answers: row.get(5)?,
                        last_updated: rows::ts_at(row, 6)?,
                    })
                },
            )
            .map_err(not_found("progress"))
    }

    /// Per-skill aggregates for a room, optionally narrowed to one skill.
    pub fn group_stats(&self, room_id: Uuid, skill_id: Option<&str>) -> Result<Vec<SkillStats>> {
        let mut stmt = self.conn().prepare(
            "SELECT skill_id, COUNT(DISTINCT user_id), AVG(mastery_score),
                    SUM(questions_answered), SUM(correct_answers)
             FROM group_progress
             WHERE room_id = ?1 AND (?2 IS NULL OR skill_id = ?2)
             GROUP BY skill_id
             ORDER BY skill_id ASC",
        )?;
        let rows = stmt.query_map(params![room_id.to_string(), skill_id], |row| {
            let avg_mastery: f64 = row.get(2)?;
            Ok(SkillStats {
                skill_id: row.get(0)?,
                participant_count: row.get(1)?,
                avg_mastery,
                avg_mastery_percent: percent(avg_mastery),
                total_questions: row.get(3)?,
                total_correct: row.get(4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// One user's standing per skill, most recently practised first.
    pub fn user_analytics(&self, room_id: Uuid, user_id: Uuid) -> Result<Vec<UserSkillAnalytics>> {
        let mut stmt = self.conn().prepare(
            "SELECT skill_id, mastery_score, questions_answered, correct_answers, last_updated
             FROM group_progress
             WHERE room_id = ?1 AND user_id = ?2
             ORDER BY last_updated DESC",
        )?;
        let rows = stmt.query_map(params![room_id.to_string(), user_id.to_string()], |row| {
            let questions_answered: i64 = row.get(2)?;
            let correct_answers: i64 = row.get(3)?;
            Ok(UserSkillAnalytics {
                skill_id: row.get(0)?,
                mastery_score: row.get(1)?,
                questions_answered,
                correct_answers,
                accuracy: accuracy(correct_answers, questions_answered),
                last_updated: rows::ts_at(row, 4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn room_analytics(&self, room_id: Uuid) -> Result<RoomAnalytics> {
        self.require_room(room_id)?;
        let room = room_id.to_string();

        let mut analytics = self.conn().query_row(
            "SELECT COUNT(DISTINCT user_id), COUNT(DISTINCT skill_id),
                    COALESCE(SUM(questions_answered), 0), COALESCE(SUM(correct_answers), 0),
                    COALESCE(AVG(mastery_score), 0)
             FROM group_progress
             WHERE room_id = ?1",
            params![room],
            |row| {
                Ok(RoomAnalytics {
                    total_participants: row.get(0)?,
                    skills_tracked: row.get(1)?,
                    total_questions: row.get(2)?,
                    total_correct: row.get(3)?,
                    avg_mastery_percent: percent(row.get(4)?),
                    ..Default::default()
                })
            },
        )?;

        analytics.shared_content_count = self.conn().query_row(
            "SELECT COUNT(*) FROM room_content WHERE room_id = ?1",
            params![room],
            |row| row.get(0),
        )?;
        analytics.total_sessions = self.conn().query_row(
            "SELECT COUNT(*) FROM study_sessions WHERE room_id = ?1",
            params![room],
            |row| row.get(0),
        )?;

        Ok(analytics)
    }

    /// Keep the best attempt: highest score, and independently the fastest
    /// time.
    pub fn record_quiz_result(
        &self,
        content_id: Uuid,
        user_id: Uuid,
        score: u32,
        total_questions: u32,
        time_taken_seconds: u32,
    ) -> Result<LeaderboardEntry> {
        if score > total_questions {
            return Err(StoreError::Invalid(format!(
                "score {score} exceeds {total_questions} questions"
            )));
        }
        let content = self.get_content(content_id)?;
        self.require_member(content.room_id, user_id, "only members can submit quiz results")?;

        self.conn().execute(
            "INSERT INTO quiz_leaderboard
                 (room_content_id, user_id, score, total_questions, time_taken_seconds,
                  completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(room_content_id, user_id) DO UPDATE SET
                 score              = max(quiz_leaderboard.score, excluded.score),
                 total_questions    = excluded.total_questions,
                 time_taken_seconds = min(quiz_leaderboard.time_taken_seconds,
                                          excluded.time_taken_seconds),
                 completed_at       = excluded.completed_at",
            params![
                content_id.to_string(),
                user_id.to_string(),
                score,
                total_questions,
                time_taken_seconds,
                rows::now(),
            ],
        )?;

        self.conn()
            .query_row(
                "SELECT l.room_content_id, l.user_id, u.name, l.score, l.total_questions,
                        l.time_taken_seconds, l.completed_at
                 FROM quiz_leaderboard l
                 JOIN users u ON u.id = l.user_id
                 WHERE l.room_content_id = ?1 AND l.user_id = ?2",
                params![content_id.to_string(), user_id.to_string()],
                row_to_entry,
            )
            .map_err(not_found("leaderboard entry"))
    }

    /// Top entries by score, ties broken by the faster time.
    pub fn leaderboard(&self, content_id: Uuid) -> Result<Vec<LeaderboardEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT l.room_content_id, l.user_id, u.name, l.score, l.total_questions,
                    l.time_taken_seconds, l.completed_at
             FROM quiz_leaderboard l
             JOIN users u ON u.id = l.user_id
             WHERE l.room_content_id = ?1
             ORDER BY l.score DESC, l.time_taken_seconds ASC, l.completed_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![content_id.to_string(), LEADERBOARD_LIMIT], row_to_entry)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Consecutive study days ending at the user's latest progress day,
    /// across all rooms or within one.
    pub fn streak(&self, user_id: Uuid, room_id: Option<Uuid>) -> Result<Streak> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT substr(last_updated, 1, 10) AS day
             FROM group_progress
             WHERE user_id = ?1 AND (?2 IS NULL OR room_id = ?2)
             ORDER BY day DESC",
        )?;
        let rows = stmt.query_map(
            params![user_id.to_string(), room_id.map(|id| id.to_string())],
            |row| rows::date_at(row, 0),
        )?;

        let mut days = Vec::new();
        for row in rows {
            days.push(row?);
        }
        Ok(streak_from_days(&days))
    }
}

/// Length of the run of consecutive days that ends at the latest day.
pub fn streak_from_days(days: &[NaiveDate]) -> Streak {
    let mut sorted = days.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();

    let Some(&last) = sorted.first() else {
        return Streak::default();
    };

    let mut current_streak = 1;
    let mut expected = last;
    for day in &sorted[1..] {
        expected -= Duration::days(1);
        if *day != expected {
            break;
        }
        current_streak += 1;
    }

    Streak {
        current_streak,
        last_study_date: Some(last),
    }
}

fn percent(fraction: f64) -> f64 {
    (fraction * 10_000.0).round() / 100.0
}

fn accuracy(correct: i64, answered: i64) -> Option<f64> {
    (answered > 0).then(|| percent(correct as f64 / answered as f64))
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LeaderboardEntry> {
    Ok(LeaderboardEntry {
        content_id: rows::uuid_at(row, 0)?,
        user_id: rows::uuid_at(row, 1)?,
        user_name: row.get(2)?,
        score: row.get(3)?,
        total_questions: row.get(4)?,
        time_taken_seconds: row.get(5)?,
        completed_at: rows::ts_at(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::tests::share_quiz;
    use crate::testutil;
    use cohort_shared::role::Role;
    use cohort_shared::ErrorCode;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn counters_add_and_mastery_overwrites() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");
        let room = testutil::room(&mut db, owner, 10);

        db.record_progress(room.id, "kinematics", owner, Some(0.4), 1, 1).unwrap();
        let rec = db
            .record_progress(room.id, "kinematics", owner, Some(0.55), 2, 1)
            .unwrap();
        assert_eq!(rec.mastery_score, 0.55);
        assert_eq!(rec.questions_answered, 3);
        assert_eq!(rec.correct_answers, 2);

        // Estimator down: counters still move, mastery stays.
        let rec = db.record_progress(room.id, "kinematics", owner, None, 1, 0).unwrap();
        assert_eq!(rec.mastery_score, 0.55);
        assert_eq!(rec.questions_answered, 4);
    }

    #[test]
    fn rejects_impossible_batches() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");
        let stranger = testutil::user(&db, "Stranger");
        let room = testutil::room(&mut db, owner, 10);

        assert!(matches!(
            db.record_progress(room.id, "s", owner, None, 1, 2),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            db.record_progress(room.id, "s", owner, Some(1.5), 1, 1),
            Err(StoreError::Invalid(_))
        ));
        let err = db.record_progress(room.id, "s", stranger, None, 1, 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
    }

    #[test]
    fn stats_and_analytics() {
        let (_dir, mut db) = testutil::open();
        let a = testutil::user(&db, "A");
        let b = testutil::user(&db, "B");
        let room = testutil::room(&mut db, a, 10);
        db.join_room(room.id, b, Role::Member).unwrap();

        db.record_progress(room.id, "algebra", a, Some(0.8), 4, 3).unwrap();
        db.record_progress(room.id, "algebra", b, Some(0.4), 2, 1).unwrap();
        db.record_progress(room.id, "geometry", a, Some(0.5), 2, 2).unwrap();
        share_quiz(&db, &room, a);

        let stats = db.group_stats(room.id, None).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].skill_id, "algebra");
        assert_eq!(stats[0].participant_count, 2);
        assert!((stats[0].avg_mastery - 0.6).abs() < 1e-9);
        assert_eq!(stats[0].avg_mastery_percent, 60.0);
        assert_eq!(stats[0].total_questions, 6);
        assert_eq!(stats[0].total_correct, 4);

        let only = db.group_stats(room.id, Some("geometry")).unwrap();
        assert_eq!(only.len(), 1);

        let mine = db.user_analytics(room.id, a).unwrap();
        let algebra = mine.iter().find(|s| s.skill_id == "algebra").unwrap();
        assert_eq!(algebra.accuracy, Some(75.0));

        let summary = db.room_analytics(room.id).unwrap();
        assert_eq!(summary.total_participants, 2);
        assert_eq!(summary.skills_tracked, 2);
        assert_eq!(summary.total_questions, 8);
        assert_eq!(summary.total_correct, 6);
        assert_eq!(summary.shared_content_count, 1);
        assert_eq!(summary.total_sessions, 0);
    }

    #[test]
    fn leaderboard_keeps_best_of_both() {
        let (_dir, mut db) = testutil::open();
        let a = testutil::user(&db, "A");
        let b = testutil::user(&db, "B");
        let room = testutil::room(&mut db, a, 10);
        db.join_room(room.id, b, Role::Member).unwrap();
        let quiz = share_quiz(&db, &room, a);

        db.record_quiz_result(quiz.id, a, 7, 10, 120).unwrap();
        let entry = db.record_quiz_result(quiz.id, a, 5, 10, 90).unwrap();
        assert_eq!(entry.score, 7);
        assert_eq!(entry.time_taken_seconds, 90);

        db.record_quiz_result(quiz.id, b, 7, 10, 60).unwrap();

        let board = db.leaderboard(quiz.id).unwrap();
        let order: Vec<_> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![b, a]);

        assert!(matches!(
            db.record_quiz_result(quiz.id, a, 11, 10, 30),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn streak_counts_consecutive_days() {
        assert_eq!(streak_from_days(&[]), Streak::default());

        let s = streak_from_days(&[
            day("2024-05-10"),
            day("2024-05-09"),
            day("2024-05-08"),
            day("2024-05-05"),
        ]);
        assert_eq!(s.current_streak, 3);
        assert_eq!(s.last_study_date, Some(day("2024-05-10")));

        let s = streak_from_days(&[day("2024-05-01"), day("2024-05-03"), day("2024-05-03")]);
        assert_eq!(s.current_streak, 1);
        assert_eq!(s.last_study_date, Some(day("2024-05-03")));

        // Month boundary.
        let s = streak_from_days(&[day("2024-03-01"), day("2024-02-29")]);
        assert_eq!(s.current_streak, 2);
    }

    #[test]
    fn streak_reads_progress_days() {
        let (_dir, mut db) = testutil::open();
        let a = testutil::user(&db, "A");
        let room = testutil::room(&mut db, a, 10);

        assert_eq!(db.streak(a, None).unwrap().current_streak, 0);
        db.record_progress(room.id, "x", a, None, 1, 1).unwrap();
        db.record_progress(room.id, "y", a, None, 1, 1).unwrap();

        let streak = db.streak(a, Some(room.id)).unwrap();
        assert_eq!(streak.current_streak, 1);
        assert_eq!(
            streak.last_study_date,
            Some(chrono::Utc::now().date_naive())
        );
    }
}
