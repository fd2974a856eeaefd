use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::lesson::{
    ContentType, Lesson, LessonDocument, LessonExclusion, LessonGroupLink, SharingMode,
};
use crate::users::{get_current_user_id, verify_token, Claims};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct CreateLessonRequest {
    title: String,
    description: Option<String>,
    content_type: ContentType,
    sharing_mode: Option<SharingMode>,
    course_id: Option<i32>,
    position: Option<i32>,
    video_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateLessonRequest {
    title: Option<String>,
    description: Option<String>,
    content_type: Option<ContentType>,
    sharing_mode: Option<SharingMode>,
    is_published: Option<bool>,
    course_id: Option<i32>,
    position: Option<i32>,
    video_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentInput {
    title: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ReplaceDocumentsRequest {
    documents: Vec<DocumentInput>,
}

#[derive(Debug, Deserialize)]
struct AddGroupLinkRequest {
    group_id: i32,
}

#[derive(Debug, Deserialize)]
struct UpdateGroupLinkRequest {
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct AddExclusionRequest {
    student_id: i32,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateCourseRequest {
    title: String,
}

#[derive(Debug, Serialize, FromRow)]
struct CourseRecord {
    id: i32,
    teacher_user_id: i32,
    title: String,
}

#[derive(Debug, Serialize)]
struct LessonDetail {
    #[serde(flatten)]
    lesson: Lesson,
    documents: Vec<LessonDocument>,
    group_links: Vec<LessonGroupLink>,
}

pub(crate) const LESSON_COLUMNS: &str =
    "id, teacher_user_id, course_id, title, description, content_type, \
     sharing_mode, is_published, position, video_url, created_at, updated_at";

pub async fn load_lesson(app_state: &AppState, lesson_id: i32) -> Result<Lesson, HttpResponse> {
    sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {LESSON_COLUMNS} FROM lessons WHERE id = $1"
    ))
    .bind(lesson_id)
    .fetch_optional(&app_state.db)
    .await
    .map_err(|e| {
        error!("Failed to load lesson: {}", e);
        HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Database error"
        }))
    })?
    .ok_or_else(|| {
        HttpResponse::NotFound().json(serde_json::json!({
            "error": "Lesson not found"
        }))
    })
}

/// Load a lesson and verify the caller owns it (or is an admin).
async fn load_owned_lesson(
    app_state: &AppState,
    claims: &Claims,
    current_user_id: i32,
    lesson_id: i32,
) -> Result<Lesson, HttpResponse> {
    let lesson = load_lesson(app_state, lesson_id).await?;

    if !claims.is_admin() && lesson.teacher_user_id != current_user_id {
        return Err(HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Not authorized"
        })));
    }

    Ok(lesson)
}

pub async fn load_lesson_documents(app_state: &AppState, lesson_id: i32) -> Vec<LessonDocument> {
    sqlx::query_as::<_, LessonDocument>(
        "SELECT id, lesson_id, title, url, position
         FROM lesson_documents
         WHERE lesson_id = $1
         ORDER BY position, id",
    )
    .bind(lesson_id)
    .fetch_all(&app_state.db)
    .await
    .unwrap_or_default()
}

async fn load_group_links(app_state: &AppState, lesson_id: i32) -> Vec<LessonGroupLink> {
    sqlx::query_as::<_, LessonGroupLink>(
        "SELECT lesson_id, group_id, is_active, assigned_at
         FROM lesson_group_links
         WHERE lesson_id = $1
         ORDER BY assigned_at",
    )
    .bind(lesson_id)
    .fetch_all(&app_state.db)
    .await
    .unwrap_or_default()
}

async fn lesson_detail(app_state: &AppState, lesson: Lesson) -> LessonDetail {
    let documents = load_lesson_documents(app_state, lesson.id).await;
    let group_links = load_group_links(app_state, lesson.id).await;
    LessonDetail {
        lesson,
        documents,
        group_links,
    }
}

#[post("/api/lessons")]
async fn create_lesson(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    payload: web::Json<CreateLessonRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    if !claims.is_admin() && !claims.is_teacher() {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Teacher access required"
        }));
    }

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let title = payload.title.trim();
    if title.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Lesson title is required"
        }));
    }

    let sharing_mode = payload.sharing_mode.unwrap_or(SharingMode::Private);

    let lesson = match sqlx::query_as::<_, Lesson>(&format!(
        "INSERT INTO lessons
             (teacher_user_id, course_id, title, description, content_type,
              sharing_mode, position, video_url)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {LESSON_COLUMNS}"
    ))
    .bind(current_user_id)
    .bind(payload.course_id)
    .bind(title)
    .bind(&payload.description)
    .bind(payload.content_type)
    .bind(sharing_mode)
    .bind(payload.position.unwrap_or(0))
    .bind(&payload.video_url)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(lesson) => lesson,
        Err(e) => {
            error!("Failed to create lesson: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to create lesson"
            }));
        }
    };

    HttpResponse::Created().json(lesson_detail(&app_state, lesson).await)
}

#[get("/api/teachers/{teacher_id}/lessons")]
async fn list_teacher_lessons(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let teacher_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    // Drafts included: this listing is for the owner only.
    if !claims.is_admin() && current_user_id != teacher_id {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Not authorized"
        }));
    }

    let lessons = match sqlx::query_as::<_, Lesson>(&format!(
        "SELECT {LESSON_COLUMNS}
         FROM lessons
         WHERE teacher_user_id = $1
         ORDER BY course_id NULLS LAST, position, created_at"
    ))
    .bind(teacher_id)
    .fetch_all(&app_state.db)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to load teacher lessons: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error"
            }));
        }
    };

    HttpResponse::Ok().json(lessons)
}

#[put("/api/lessons/{lesson_id}")]
async fn update_lesson(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<UpdateLessonRequest>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let lesson = match load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await {
        Ok(lesson) => lesson,
        Err(response) => return response,
    };

    if let Some(title) = payload.title.as_ref() {
        if title.trim().is_empty() {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Lesson title is required"
            }));
        }
    }

    let updated = match sqlx::query_as::<_, Lesson>(&format!(
        "UPDATE lessons
         SET title = COALESCE($1, title),
             description = COALESCE($2, description),
             content_type = COALESCE($3, content_type),
             sharing_mode = COALESCE($4, sharing_mode),
             is_published = COALESCE($5, is_published),
             course_id = COALESCE($6, course_id),
             position = COALESCE($7, position),
             video_url = COALESCE($8, video_url),
             updated_at = NOW()
         WHERE id = $9
         RETURNING {LESSON_COLUMNS}"
    ))
    .bind(payload.title.as_ref().map(|t| t.trim().to_string()))
    .bind(&payload.description)
    .bind(payload.content_type)
    .bind(payload.sharing_mode)
    .bind(payload.is_published)
    .bind(payload.course_id)
    .bind(payload.position)
    .bind(&payload.video_url)
    .bind(lesson.id)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(lesson) => lesson,
        Err(e) => {
            error!("Failed to update lesson: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update lesson"
            }));
        }
    };

    HttpResponse::Ok().json(lesson_detail(&app_state, updated).await)
}

#[delete("/api/lessons/{lesson_id}")]
async fn delete_lesson(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await
    {
        return response;
    }

    // Progress records, documents, group links and exclusions go with the
    // lesson via ON DELETE CASCADE.
    if let Err(e) = sqlx::query("DELETE FROM lessons WHERE id = $1")
        .bind(lesson_id)
        .execute(&app_state.db)
        .await
    {
        error!("Failed to delete lesson: {}", e);
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to delete lesson"
        }));
    }

    HttpResponse::Ok().json(serde_json::json!({
        "status": "deleted"
    }))
}

#[put("/api/lessons/{lesson_id}/documents")]
async fn replace_lesson_documents(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<ReplaceDocumentsRequest>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await
    {
        return response;
    }

    let mut tx = match app_state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("Failed to start documents transaction: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error"
            }));
        }
    };

    if let Err(e) = sqlx::query("DELETE FROM lesson_documents WHERE lesson_id = $1")
        .bind(lesson_id)
        .execute(&mut *tx)
        .await
    {
        error!("Failed to clear lesson documents: {}", e);
        let _ = tx.rollback().await;
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to update documents"
        }));
    }

    for (position, document) in payload.documents.iter().enumerate() {
        if let Err(e) = sqlx::query(
            "INSERT INTO lesson_documents (lesson_id, title, url, position)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(lesson_id)
        .bind(document.title.trim())
        .bind(document.url.trim())
        .bind(position as i32)
        .execute(&mut *tx)
        .await
        {
            error!("Failed to insert lesson document: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update documents"
            }));
        }
    }

    if let Err(e) = tx.commit().await {
        error!("Failed to commit documents update: {}", e);
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to update documents"
        }));
    }

    HttpResponse::Ok().json(load_lesson_documents(&app_state, lesson_id).await)
}

#[post("/api/lessons/{lesson_id}/groups")]
async fn add_lesson_group(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<AddGroupLinkRequest>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await
    {
        return response;
    }

    let group_owned = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
            SELECT 1 FROM student_groups
            WHERE id = $1 AND (teacher_user_id = $2 OR $3)
        )",
    )
    .bind(payload.group_id)
    .bind(current_user_id)
    .bind(claims.is_admin())
    .fetch_one(&app_state.db)
    .await
    .unwrap_or(false);

    if !group_owned {
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": "Group not found"
        }));
    }

    // Re-adding an existing link reactivates it.
    if let Err(e) = sqlx::query(
        "INSERT INTO lesson_group_links (lesson_id, group_id)
         VALUES ($1, $2)
         ON CONFLICT (lesson_id, group_id)
         DO UPDATE SET is_active = TRUE, assigned_at = NOW()",
    )
    .bind(lesson_id)
    .bind(payload.group_id)
    .execute(&app_state.db)
    .await
    {
        error!("Failed to link group to lesson: {}", e);
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to link group"
        }));
    }

    HttpResponse::Ok().json(load_group_links(&app_state, lesson_id).await)
}

#[put("/api/lessons/{lesson_id}/groups/{group_id}")]
async fn update_lesson_group(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<(i32, i32)>,
    payload: web::Json<UpdateGroupLinkRequest>,
) -> impl Responder {
    let (lesson_id, group_id) = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await
    {
        return response;
    }

    let result = match sqlx::query(
        "UPDATE lesson_group_links
         SET is_active = $1
         WHERE lesson_id = $2 AND group_id = $3",
    )
    .bind(payload.is_active)
    .bind(lesson_id)
    .bind(group_id)
    .execute(&app_state.db)
    .await
    {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to update group link: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update group link"
            }));
        }
    };

    if result.rows_affected() == 0 {
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": "Group link not found"
        }));
    }

    HttpResponse::Ok().json(load_group_links(&app_state, lesson_id).await)
}

#[delete("/api/lessons/{lesson_id}/groups/{group_id}")]
async fn remove_lesson_group(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<(i32, i32)>,
) -> impl Responder {
    let (lesson_id, group_id) = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await
    {
        return response;
    }

    let result = match sqlx::query(
        "DELETE FROM lesson_group_links
         WHERE lesson_id = $1 AND group_id = $2",
    )
    .bind(lesson_id)
    .bind(group_id)
    .execute(&app_state.db)
    .await
    {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to remove group link: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to remove group link"
            }));
        }
    };

    if result.rows_affected() == 0 {
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": "Group link not found"
        }));
    }

    HttpResponse::Ok().json(serde_json::json!({
        "status": "removed"
    }))
}

#[get("/api/lessons/{lesson_id}/exclusions")]
async fn list_lesson_exclusions(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await
    {
        return response;
    }

    let exclusions = sqlx::query_as::<_, LessonExclusion>(
        "SELECT lesson_id, student_user_id, reason, excluded_at
         FROM lesson_exclusions
         WHERE lesson_id = $1
         ORDER BY excluded_at",
    )
    .bind(lesson_id)
    .fetch_all(&app_state.db)
    .await
    .unwrap_or_default();

    HttpResponse::Ok().json(exclusions)
}

#[post("/api/lessons/{lesson_id}/exclusions")]
async fn add_lesson_exclusion(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<AddExclusionRequest>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await
    {
        return response;
    }

    if let Err(e) = sqlx::query(
        "INSERT INTO lesson_exclusions (lesson_id, student_user_id, reason)
         VALUES ($1, $2, $3)
         ON CONFLICT (lesson_id, student_user_id)
         DO UPDATE SET reason = EXCLUDED.reason, excluded_at = NOW()",
    )
    .bind(lesson_id)
    .bind(payload.student_id)
    .bind(&payload.reason)
    .execute(&app_state.db)
    .await
    {
        error!("Failed to add lesson exclusion: {}", e);
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to add exclusion"
        }));
    }

    HttpResponse::Ok().json(serde_json::json!({
        "status": "excluded"
    }))
}

#[delete("/api/lessons/{lesson_id}/exclusions/{student_id}")]
async fn remove_lesson_exclusion(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<(i32, i32)>,
) -> impl Responder {
    let (lesson_id, student_id) = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = load_owned_lesson(&app_state, &claims, current_user_id, lesson_id).await
    {
        return response;
    }

    let result = match sqlx::query(
        "DELETE FROM lesson_exclusions
         WHERE lesson_id = $1 AND student_user_id = $2",
    )
    .bind(lesson_id)
    .bind(student_id)
    .execute(&app_state.db)
    .await
    {
        Ok(result) => result,
        Err(e) => {
            error!("Failed to remove lesson exclusion: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to remove exclusion"
            }));
        }
    };

    if result.rows_affected() == 0 {
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": "Exclusion not found"
        }));
    }

    HttpResponse::Ok().json(serde_json::json!({
        "status": "removed"
    }))
}

#[post("/api/courses")]
async fn create_course(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    payload: web::Json<CreateCourseRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    if !claims.is_admin() && !claims.is_teacher() {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Teacher access required"
        }));
    }

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let title = payload.title.trim();
    if title.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Course title is required"
        }));
    }

    match sqlx::query_as::<_, CourseRecord>(
        "INSERT INTO courses (teacher_user_id, title)
         VALUES ($1, $2)
         RETURNING id, teacher_user_id, title",
    )
    .bind(current_user_id)
    .bind(title)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(course) => HttpResponse::Created().json(course),
        Err(e) => {
            error!("Failed to create course: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to create course"
            }))
        }
    }
}

#[get("/api/teachers/{teacher_id}/courses")]
async fn list_teacher_courses(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let teacher_id = path.into_inner();

    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    match sqlx::query_as::<_, CourseRecord>(
        "SELECT id, teacher_user_id, title
         FROM courses
         WHERE teacher_user_id = $1
         ORDER BY created_at",
    )
    .bind(teacher_id)
    .fetch_all(&app_state.db)
    .await
    {
        Ok(courses) => HttpResponse::Ok().json(courses),
        Err(e) => {
            error!("Failed to load courses: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error"
            }))
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(create_lesson)
        .service(list_teacher_lessons)
        .service(update_lesson)
        .service(delete_lesson)
        .service(replace_lesson_documents)
        .service(add_lesson_group)
        .service(update_lesson_group)
        .service(remove_lesson_group)
        .service(list_lesson_exclusions)
        .service(add_lesson_exclusion)
        .service(remove_lesson_exclusion)
        .service(create_course)
        .service(list_teacher_courses);
}
