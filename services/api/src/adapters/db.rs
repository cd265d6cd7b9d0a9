//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_builder_core::domain::{
    Lesson, LoadedPlan, Module, Outline, PersistedOutline, SavedPlan,
};
use course_builder_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

/// Used when a stored lesson has no time estimate.
const DEFAULT_ESTIMATED_MINUTES: u32 = 10;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct PlanRecord {
    id: Uuid,
    topic: String,
    title: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl PlanRecord {
    fn to_domain(self) -> SavedPlan {
        SavedPlan {
            id: self.id,
            topic: self.topic,
            title: self.title,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ModuleRecord {
    id: Uuid,
    title: String,
    description: Option<String>,
}

#[derive(FromRow)]
struct LessonRecord {
    id: Uuid,
    module_id: Uuid,
    title: String,
    estimated_minutes: Option<i32>,
    completed: bool,
    content: Option<String>,
}
impl LessonRecord {
    fn to_domain(self) -> Lesson {
        Lesson {
            id: self.id.to_string(),
            title: self.title,
            estimated_minutes: self
                .estimated_minutes
                .and_then(|m| u32::try_from(m).ok())
                .filter(|m| *m > 0)
                .unwrap_or(DEFAULT_ESTIMATED_MINUTES),
            content: self.content,
            completed: self.completed,
        }
    }
}

fn parse_lesson_id(lesson_id: &str) -> PortResult<Uuid> {
    Uuid::parse_str(lesson_id)
        .map_err(|_| PortError::NotFound(format!("Lesson {} not found", lesson_id)))
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn save_plan(
        &self,
        user_id: Uuid,
        topic: &str,
        outline: &Outline,
    ) -> PortResult<PersistedOutline> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let plan_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO learning_plans (id, user_id, topic, title, description) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(plan_id)
        .bind(user_id)
        .bind(topic)
        .bind(&outline.title)
        .bind(&outline.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let mut modules = Vec::with_capacity(outline.modules.len());
        for (module_index, module) in outline.modules.iter().enumerate() {
            let module_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO modules (id, learning_plan_id, title, description, order_index) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(module_id)
            .bind(plan_id)
            .bind(&module.title)
            .bind(&module.description)
            .bind(module_index as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

            let mut lessons = Vec::with_capacity(module.lessons.len());
            for (lesson_index, lesson) in module.lessons.iter().enumerate() {
                let lesson_id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO lessons (id, module_id, title, estimated_minutes, order_index, completed) VALUES ($1, $2, $3, $4, $5, FALSE)",
                )
                .bind(lesson_id)
                .bind(module_id)
                .bind(&lesson.title)
                .bind(i32::try_from(lesson.estimated_minutes).unwrap_or(i32::MAX))
                .bind(lesson_index as i32)
                .execute(&mut *tx)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;

                lessons.push(Arc::new(Lesson {
                    id: lesson_id.to_string(),
                    title: lesson.title.clone(),
                    estimated_minutes: lesson.estimated_minutes,
                    content: None,
                    completed: false,
                }));
            }

            modules.push(Arc::new(Module {
                id: module_id.to_string(),
                title: module.title.clone(),
                description: module.description.clone(),
                lessons,
            }));
        }

        tx.commit()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(PersistedOutline {
            plan_id,
            outline: Outline {
                title: outline.title.clone(),
                description: outline.description.clone(),
                modules,
            },
        })
    }

    async fn load_plan(&self, user_id: Uuid, plan_id: Uuid) -> PortResult<LoadedPlan> {
        let plan = sqlx::query_as::<_, PlanRecord>(
            "SELECT id, topic, title, description, created_at, updated_at FROM learning_plans WHERE id = $1 AND user_id = $2",
        )
        .bind(plan_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Plan {} not found", plan_id)),
            _ => PortError::Unexpected(e.to_string()),
        })?;

        let module_records = sqlx::query_as::<_, ModuleRecord>(
            "SELECT id, title, description FROM modules WHERE learning_plan_id = $1 ORDER BY order_index",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let lesson_records = sqlx::query_as::<_, LessonRecord>(
            "SELECT l.id, l.module_id, l.title, l.estimated_minutes, l.completed, c.content \
             FROM lessons l \
             JOIN modules m ON m.id = l.module_id \
             LEFT JOIN lesson_content c ON c.lesson_id = l.id \
             WHERE m.learning_plan_id = $1 \
             ORDER BY m.order_index, l.order_index",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let mut lessons_by_module: Vec<(Uuid, Vec<Arc<Lesson>>)> = module_records
            .iter()
            .map(|m| (m.id, Vec::new()))
            .collect();
        for record in lesson_records {
            if let Some((_, lessons)) = lessons_by_module
                .iter_mut()
                .find(|(module_id, _)| *module_id == record.module_id)
            {
                lessons.push(Arc::new(record.to_domain()));
            }
        }

        let modules = module_records
            .into_iter()
            .zip(lessons_by_module)
            .map(|(module, (_, lessons))| {
                Arc::new(Module {
                    id: module.id.to_string(),
                    title: module.title,
                    description: module.description.unwrap_or_default(),
                    lessons,
                })
            })
            .collect();

        let plan = plan.to_domain();
        Ok(LoadedPlan {
            plan_id: plan.id,
            topic: plan.topic,
            outline: Outline {
                title: plan.title,
                description: plan.description.unwrap_or_default(),
                modules,
            },
        })
    }

    async fn delete_plan(&self, user_id: Uuid, plan_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM learning_plans WHERE id = $1 AND user_id = $2")
            .bind(plan_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Plan {} not found", plan_id)));
        }
        Ok(())
    }

    async fn list_plans(&self, user_id: Uuid) -> PortResult<Vec<SavedPlan>> {
        let records = sqlx::query_as::<_, PlanRecord>(
            "SELECT id, topic, title, description, created_at, updated_at FROM learning_plans WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let plans = records.into_iter().map(|r| r.to_domain()).collect();
        Ok(plans)
    }

    async fn mark_lesson_complete(&self, lesson_id: &str) -> PortResult<()> {
        let lesson_id = parse_lesson_id(lesson_id)?;
        let result = sqlx::query("UPDATE lessons SET completed = TRUE WHERE id = $1")
            .bind(lesson_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Lesson {} not found", lesson_id)));
        }
        self.touch_plan_of(lesson_id).await
    }

    async fn save_lesson_content(&self, lesson_id: &str, content: &str) -> PortResult<()> {
        let lesson_id = parse_lesson_id(lesson_id)?;
        sqlx::query(
            "INSERT INTO lesson_content (lesson_id, content) VALUES ($1, $2) \
             ON CONFLICT (lesson_id) DO UPDATE SET content = EXCLUDED.content, updated_at = now()",
        )
        .bind(lesson_id)
        .bind(content)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.touch_plan_of(lesson_id).await
    }
}

impl DbAdapter {
    /// Bumps `updated_at` on the plan owning a lesson so plan pickers sort by activity.
    async fn touch_plan_of(&self, lesson_id: Uuid) -> PortResult<()> {
        sqlx::query(
            "UPDATE learning_plans SET updated_at = now() WHERE id = \
             (SELECT m.learning_plan_id FROM lessons l JOIN modules m ON m.id = l.module_id WHERE l.id = $1)",
        )
        .bind(lesson_id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
