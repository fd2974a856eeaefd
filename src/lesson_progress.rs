use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use log::error;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};

use crate::access::{can_open, AccessContext};
use crate::completion::{apply_update, mark_complete, reset, ProgressSignals};
use crate::lessons::{load_lesson, load_lesson_documents, LESSON_COLUMNS};
use crate::models::lesson::{Lesson, LessonDocument};
use crate::models::progress::ProgressRecord;
use crate::users::{get_current_user_id, verify_token, Claims};
use crate::AppState;

const PROGRESS_COLUMNS: &str = "id, lesson_id, student_user_id, status, completion_percentage, \
     video_progress, documents_read, total_documents, time_spent_minutes, \
     started_at, completed_at, created_at, updated_at";

#[derive(Debug, Serialize)]
struct LessonView {
    #[serde(flatten)]
    lesson: Lesson,
    documents: Vec<LessonDocument>,
    progress: Option<ProgressRecord>,
}

fn access_denied() -> HttpResponse {
    HttpResponse::Forbidden().json(serde_json::json!({
        "error": "You do not have permission to view this lesson"
    }))
}

fn database_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "Database error"
    }))
}

/// Assemble the sharing-policy inputs for one (lesson, learner) pair.
/// Always read fresh: group links and exclusions may have changed since the
/// last check, and access is not sticky.
async fn load_access_context(
    db: &PgPool,
    lesson_id: i32,
    learner_id: i32,
) -> Result<AccessContext, HttpResponse> {
    let learner_group_ids = sqlx::query_scalar::<_, i32>(
        "SELECT gsr.group_id
         FROM group_student_relations gsr
         JOIN student_groups sg ON sg.id = gsr.group_id
         WHERE gsr.student_user_id = $1 AND sg.status = 'active'",
    )
    .bind(learner_id)
    .fetch_all(db)
    .await
    .map_err(|e| {
        error!("Failed to load learner groups: {}", e);
        database_error()
    })?;

    let active_group_ids = sqlx::query_scalar::<_, i32>(
        "SELECT group_id FROM lesson_group_links
         WHERE lesson_id = $1 AND is_active = TRUE",
    )
    .bind(lesson_id)
    .fetch_all(db)
    .await
    .map_err(|e| {
        error!("Failed to load lesson group links: {}", e);
        database_error()
    })?;

    let is_excluded = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
            SELECT 1 FROM lesson_exclusions
            WHERE lesson_id = $1 AND student_user_id = $2
        )",
    )
    .bind(lesson_id)
    .bind(learner_id)
    .fetch_one(db)
    .await
    .map_err(|e| {
        error!("Failed to check lesson exclusion: {}", e);
        database_error()
    })?;

    Ok(AccessContext {
        learner_group_ids,
        active_group_ids,
        is_excluded,
    })
}

/// Gate a learner against a lesson. The owning instructor (and admins)
/// bypass the sharing policy entirely.
async fn ensure_can_open(
    db: &PgPool,
    lesson: &Lesson,
    claims: &Claims,
    learner_id: i32,
) -> Result<(), HttpResponse> {
    if claims.is_admin() || lesson.teacher_user_id == learner_id {
        return Ok(());
    }

    let ctx = load_access_context(db, lesson.id, learner_id).await?;
    if can_open(lesson.is_published, lesson.sharing_mode, &ctx) {
        Ok(())
    } else {
        Err(access_denied())
    }
}

async fn lesson_has_documents(db: &PgPool, lesson_id: i32) -> Result<bool, HttpResponse> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM lesson_documents WHERE lesson_id = $1)",
    )
    .bind(lesson_id)
    .fetch_one(db)
    .await
    .map_err(|e| {
        error!("Failed to check lesson documents: {}", e);
        database_error()
    })
}

/// Idempotent get-or-create for the (lesson, learner) progress row, locked
/// for the rest of the transaction. The unique constraint on the pair plus
/// the row lock serializes racing updates for the same learner and lesson.
async fn ensure_record_locked(
    conn: &mut PgConnection,
    lesson_id: i32,
    learner_id: i32,
) -> Result<ProgressRecord, sqlx::Error> {
    sqlx::query(
        "INSERT INTO lesson_progress (lesson_id, student_user_id)
         VALUES ($1, $2)
         ON CONFLICT (lesson_id, student_user_id) DO NOTHING",
    )
    .bind(lesson_id)
    .bind(learner_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, ProgressRecord>(&format!(
        "SELECT {PROGRESS_COLUMNS}
         FROM lesson_progress
         WHERE lesson_id = $1 AND student_user_id = $2
         FOR UPDATE"
    ))
    .bind(lesson_id)
    .bind(learner_id)
    .fetch_one(&mut *conn)
    .await
}

async fn save_record(conn: &mut PgConnection, record: &ProgressRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE lesson_progress
         SET status = $1,
             completion_percentage = $2,
             video_progress = $3,
             documents_read = $4,
             total_documents = $5,
             time_spent_minutes = $6,
             started_at = $7,
             completed_at = $8,
             updated_at = NOW()
         WHERE id = $9",
    )
    .bind(record.status)
    .bind(record.completion_percentage)
    .bind(record.video_progress)
    .bind(record.documents_read)
    .bind(record.total_documents)
    .bind(record.time_spent_minutes)
    .bind(record.started_at)
    .bind(record.completed_at)
    .bind(record.id)
    .execute(conn)
    .await
    .map(|_| ())
}

/// Run a closure over the locked progress record inside one transaction and
/// persist the mutated record.
async fn mutate_record<F>(
    app_state: &AppState,
    lesson_id: i32,
    learner_id: i32,
    mutate: F,
) -> Result<ProgressRecord, HttpResponse>
where
    F: FnOnce(&mut ProgressRecord),
{
    let mut tx = app_state.db.begin().await.map_err(|e| {
        error!("Failed to start progress transaction: {}", e);
        database_error()
    })?;

    let mut record = ensure_record_locked(&mut *tx, lesson_id, learner_id)
        .await
        .map_err(|e| {
            error!("Failed to ensure progress record: {}", e);
            database_error()
        })?;

    mutate(&mut record);

    save_record(&mut *tx, &record).await.map_err(|e| {
        error!("Failed to save progress record: {}", e);
        database_error()
    })?;

    tx.commit().await.map_err(|e| {
        error!("Failed to commit progress update: {}", e);
        database_error()
    })?;

    Ok(record)
}

#[get("/api/lessons")]
async fn list_accessible_lessons(req: HttpRequest, app_state: web::Data<AppState>) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let learner_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let lessons = match sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {LESSON_COLUMNS}
         FROM lessons
         WHERE is_published = TRUE
         ORDER BY course_id NULLS LAST, position, created_at"
    ))
    .fetch_all(&app_state.db)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to load published lessons: {}", e);
            return database_error();
        }
    };

    let mut visible = Vec::new();
    for lesson in lessons {
        let ctx = match load_access_context(&app_state.db, lesson.id, learner_id).await {
            Ok(ctx) => ctx,
            Err(response) => return response,
        };
        let permitted = lesson.teacher_user_id == learner_id
            || can_open(lesson.is_published, lesson.sharing_mode, &ctx);
        if !permitted {
            continue;
        }

        let progress = sqlx::query_as::<_, ProgressRecord>(&format!(
            "SELECT {PROGRESS_COLUMNS}
             FROM lesson_progress
             WHERE lesson_id = $1 AND student_user_id = $2"
        ))
        .bind(lesson.id)
        .bind(learner_id)
        .fetch_optional(&app_state.db)
        .await
        .unwrap_or(None);

        let documents = load_lesson_documents(&app_state, lesson.id).await;
        visible.push(LessonView {
            lesson,
            documents,
            progress,
        });
    }

    HttpResponse::Ok().json(visible)
}

#[get("/api/lessons/{lesson_id}")]
async fn open_lesson(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let learner_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let lesson = match load_lesson(&app_state, lesson_id).await {
        Ok(lesson) => lesson,
        Err(response) => return response,
    };

    if let Err(response) = ensure_can_open(&app_state.db, &lesson, &claims, learner_id).await {
        return response;
    }

    // Owners and admins get the lesson without a progress record of their own.
    if lesson.teacher_user_id == learner_id || claims.is_admin() {
        let documents = load_lesson_documents(&app_state, lesson.id).await;
        return HttpResponse::Ok().json(LessonView {
            lesson,
            documents,
            progress: None,
        });
    }

    let record = match mutate_record(&app_state, lesson_id, learner_id, |_| {}).await {
        Ok(record) => record,
        Err(response) => return response,
    };

    let documents = load_lesson_documents(&app_state, lesson.id).await;
    HttpResponse::Ok().json(LessonView {
        lesson,
        documents,
        progress: Some(record),
    })
}

#[post("/api/lessons/{lesson_id}/progress")]
async fn update_lesson_progress(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<ProgressSignals>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let learner_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let lesson = match load_lesson(&app_state, lesson_id).await {
        Ok(lesson) => lesson,
        Err(response) => return response,
    };

    if let Err(response) = ensure_can_open(&app_state.db, &lesson, &claims, learner_id).await {
        return response;
    }

    let has_documents = match lesson_has_documents(&app_state.db, lesson_id).await {
        Ok(value) => value,
        Err(response) => return response,
    };
    let has_video = lesson.has_video();
    let content_type = lesson.content_type;
    let signals = payload.into_inner();
    let now = chrono::Utc::now();

    let record = match mutate_record(&app_state, lesson_id, learner_id, |record| {
        apply_update(record, &signals, content_type, has_video, has_documents, now);
    })
    .await
    {
        Ok(record) => record,
        Err(response) => return response,
    };

    HttpResponse::Ok().json(record)
}

#[post("/api/lessons/{lesson_id}/progress/complete")]
async fn complete_lesson_progress(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let learner_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let lesson = match load_lesson(&app_state, lesson_id).await {
        Ok(lesson) => lesson,
        Err(response) => return response,
    };

    if let Err(response) = ensure_can_open(&app_state.db, &lesson, &claims, learner_id).await {
        return response;
    }

    let now = chrono::Utc::now();
    let record = match mutate_record(&app_state, lesson_id, learner_id, |record| {
        mark_complete(record, now);
    })
    .await
    {
        Ok(record) => record,
        Err(response) => return response,
    };

    HttpResponse::Ok().json(record)
}

/// Resolve an instructor override call: the caller must own the lesson (or
/// be an admin) to touch another learner's record.
async fn ensure_instructor_override(
    app_state: &AppState,
    req: &HttpRequest,
    lesson_id: i32,
) -> Result<Lesson, HttpResponse> {
    let claims = verify_token(req, app_state)?;
    let current_user_id = get_current_user_id(&claims, &app_state.db).await?;
    let lesson = load_lesson(app_state, lesson_id).await?;

    if !claims.is_admin() && lesson.teacher_user_id != current_user_id {
        return Err(HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Not authorized"
        })));
    }

    Ok(lesson)
}

#[post("/api/lessons/{lesson_id}/students/{student_id}/progress/complete")]
async fn instructor_complete_progress(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<(i32, i32)>,
) -> impl Responder {
    let (lesson_id, student_id) = path.into_inner();

    if let Err(response) = ensure_instructor_override(&app_state, &req, lesson_id).await {
        return response;
    }

    let now = chrono::Utc::now();
    let record = match mutate_record(&app_state, lesson_id, student_id, |record| {
        mark_complete(record, now);
    })
    .await
    {
        Ok(record) => record,
        Err(response) => return response,
    };

    HttpResponse::Ok().json(record)
}

#[post("/api/lessons/{lesson_id}/students/{student_id}/progress/reset")]
async fn instructor_reset_progress(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<(i32, i32)>,
) -> impl Responder {
    let (lesson_id, student_id) = path.into_inner();

    if let Err(response) = ensure_instructor_override(&app_state, &req, lesson_id).await {
        return response;
    }

    let record = match mutate_record(&app_state, lesson_id, student_id, |record| {
        reset(record);
    })
    .await
    {
        Ok(record) => record,
        Err(response) => return response,
    };

    HttpResponse::Ok().json(record)
}

#[get("/api/lessons/{lesson_id}/progress")]
async fn list_lesson_progress(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    if let Err(response) = ensure_instructor_override(&app_state, &req, lesson_id).await {
        return response;
    }

    let records = sqlx::query_as::<_, ProgressRecord>(&format!(
        "SELECT {PROGRESS_COLUMNS}
         FROM lesson_progress
         WHERE lesson_id = $1
         ORDER BY student_user_id"
    ))
    .bind(lesson_id)
    .fetch_all(&app_state.db)
    .await
    .unwrap_or_default();

    HttpResponse::Ok().json(records)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_accessible_lessons)
        .service(open_lesson)
        .service(update_lesson_progress)
        .service(complete_lesson_progress)
        .service(instructor_complete_progress)
        .service(instructor_reset_progress)
        .service(list_lesson_progress);
}
