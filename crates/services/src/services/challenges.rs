use chrono::{Duration, Utc};
use db::models::{
    achievement::Achievement,
    challenge::{Challenge, UserChallenge},
    user::User,
};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    gamification::GamificationService, progress_ledger::PointsAndLevel, stores::GamificationError,
};

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Gamification(#[from] GamificationError),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("challenge not found or inactive")]
    NotFound,
    #[error("challenge already accepted")]
    AlreadyAccepted,
    #[error("challenge was never accepted")]
    NotAccepted,
    #[error("challenge already completed")]
    AlreadyCompleted,
    #[error("challenge ended before it was completed")]
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeCompletion {
    pub challenge: UserChallenge,
    pub progress: PointsAndLevel,
    pub newly_unlocked: Vec<Achievement>,
}

#[derive(Clone)]
pub struct ChallengeService {
    pool: SqlitePool,
    gamification: GamificationService,
}

impl ChallengeService {
    pub fn new(pool: SqlitePool, gamification: GamificationService) -> Self {
        Self { pool, gamification }
    }

    pub async fn list_active(&self) -> Result<Vec<Challenge>, ChallengeError> {
        Ok(Challenge::find_active(&self.pool).await?)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UserChallenge>, ChallengeError> {
        Ok(UserChallenge::find_by_user(&self.pool, user_id).await?)
    }

    /// Opt the user into an active challenge, ending `duration_days` from now
    pub async fn accept(
        &self,
        user_id: Uuid,
        challenge_id: Uuid,
    ) -> Result<UserChallenge, ChallengeError> {
        let challenge = Challenge::find_by_id(&self.pool, challenge_id)
            .await?
            .filter(|c| c.active)
            .ok_or(ChallengeError::NotFound)?;
        if User::find_by_id(&self.pool, user_id).await?.is_none() {
            return Err(ChallengeError::UserNotFound(user_id));
        }
        if UserChallenge::find(&self.pool, user_id, challenge_id).await?.is_some() {
            return Err(ChallengeError::AlreadyAccepted);
        }

        let started_at = Utc::now();
        let ends_at = started_at + Duration::days(challenge.duration_days);
        let accepted = UserChallenge::create(&self.pool, user_id, challenge_id, started_at, ends_at)
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent accept
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    ChallengeError::AlreadyAccepted
                }
                other => ChallengeError::Database(other),
            })?;

        info!(
            user_id = %user_id,
            challenge_id = %challenge_id,
            ends_at = %ends_at,
            "Challenge accepted"
        );
        Ok(accepted)
    }

    /// Mark an accepted challenge as done, pay out its points and re-evaluate achievements
    pub async fn complete(
        &self,
        user_id: Uuid,
        challenge_id: Uuid,
    ) -> Result<ChallengeCompletion, ChallengeError> {
        let challenge = Challenge::find_by_id(&self.pool, challenge_id)
            .await?
            .ok_or(ChallengeError::NotFound)?;
        let accepted = UserChallenge::find(&self.pool, user_id, challenge_id)
            .await?
            .ok_or(ChallengeError::NotAccepted)?;
        if accepted.completed_at.is_some() {
            return Err(ChallengeError::AlreadyCompleted);
        }
        let now = Utc::now();
        if now > accepted.ends_at {
            return Err(ChallengeError::Expired);
        }

        if !UserChallenge::mark_completed(&self.pool, user_id, challenge_id, now).await? {
            return Err(ChallengeError::AlreadyCompleted);
        }

        let delta = u32::try_from(challenge.points).unwrap_or(0);
        let update = match self.gamification.reward(user_id, delta).await {
            Ok(update) => update,
            Err(e) => {
                if let Err(clear_err) =
                    UserChallenge::clear_completed(&self.pool, user_id, challenge_id).await
                {
                    warn!(
                        challenge_id = %challenge_id,
                        error = %clear_err,
                        "Failed to revert challenge completion"
                    );
                }
                return Err(e.into());
            }
        };

        info!(
            user_id = %user_id,
            challenge_id = %challenge_id,
            points = delta,
            "Challenge completed"
        );

        let challenge = UserChallenge::find(&self.pool, user_id, challenge_id)
            .await?
            .ok_or(ChallengeError::NotAccepted)?;
        Ok(ChallengeCompletion {
            challenge,
            progress: update.progress,
            newly_unlocked: update.newly_unlocked,
        })
    }
}

#[cfg(test)]
mod tests {
    use db::{
        DBService,
        models::{
            achievement::CreateAchievement,
            challenge::CreateChallenge,
            user::CreateUser,
        },
    };

    use super::*;
    use crate::services::config::Config;

    async fn setup() -> (DBService, ChallengeService, Uuid) {
        utils::logging::init_test_tracing();
        let db = DBService::new_in_memory().await.unwrap();
        let service = ChallengeService::new(
            db.pool.clone(),
            GamificationService::sqlite(db.pool.clone(), &Config::default()),
        );
        let user = User::create(
            &db.pool,
            &CreateUser {
                name: "Heitor".to_string(),
                email: "heitor@example.com".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        (db, service, user.id)
    }

    async fn challenge(db: &DBService, title: &str, days: i64, points: i64) -> Challenge {
        Challenge::create(
            &db.pool,
            &CreateChallenge {
                title: title.to_string(),
                description: format!("{title} for {days} days"),
                duration_days: days,
                points: Some(points),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn accept_sets_end_date_and_rejects_duplicates() {
        let (db, service, user_id) = setup().await;
        let week = challenge(&db, "Inbox zero", 7, 30).await;

        let accepted = service.accept(user_id, week.id).await.unwrap();
        assert_eq!(accepted.ends_at - accepted.started_at, Duration::days(7));
        assert!(accepted.completed_at.is_none());

        assert!(matches!(
            service.accept(user_id, week.id).await,
            Err(ChallengeError::AlreadyAccepted)
        ));
        assert_eq!(service.list_for_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inactive_or_missing_challenges_are_not_found() {
        let (db, service, user_id) = setup().await;
        let retired = challenge(&db, "Retired", 3, 10).await;
        Challenge::set_active(&db.pool, retired.id, false).await.unwrap();

        assert!(service.list_active().await.unwrap().is_empty());
        assert!(matches!(
            service.accept(user_id, retired.id).await,
            Err(ChallengeError::NotFound)
        ));
        assert!(matches!(
            service.accept(user_id, Uuid::new_v4()).await,
            Err(ChallengeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn completion_pays_once_and_evaluates() {
        let (db, service, user_id) = setup().await;
        let marathon = challenge(&db, "Marathon", 30, 400).await;
        let level_five = Achievement::create(
            &db.pool,
            &CreateAchievement {
                title: "Level 5".to_string(),
                description: String::new(),
                icon: None,
                points: Some(10),
                criteria: "REACH_LEVEL_5".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        assert!(matches!(
            service.complete(user_id, marathon.id).await,
            Err(ChallengeError::NotAccepted)
        ));

        service.accept(user_id, marathon.id).await.unwrap();
        let done = service.complete(user_id, marathon.id).await.unwrap();
        assert!(done.challenge.completed_at.is_some());
        assert_eq!(done.challenge.progress, 100);
        assert_eq!(done.newly_unlocked, vec![level_five]);
        assert_eq!(done.progress, PointsAndLevel { points: 410, level: 5 });

        assert!(matches!(
            service.complete(user_id, marathon.id).await,
            Err(ChallengeError::AlreadyCompleted)
        ));
    }

    #[tokio::test]
    async fn expired_challenge_cannot_be_completed() {
        let (db, service, user_id) = setup().await;
        let old = challenge(&db, "Old", 1, 50).await;
        let started_at = Utc::now() - Duration::days(3);
        UserChallenge::create(&db.pool, user_id, old.id, started_at, started_at + Duration::days(1))
            .await
            .unwrap();

        assert!(matches!(
            service.complete(user_id, old.id).await,
            Err(ChallengeError::Expired)
        ));
    }
}
