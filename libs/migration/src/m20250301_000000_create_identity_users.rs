use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IdentityUsers::Table)
                    .if_not_exists()
                    .col(pk_uuid(IdentityUsers::Id))
                    .col(
                        ColumnDef::new(IdentityUsers::Email)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(string(IdentityUsers::PasswordHash))
                    .col(string_len(IdentityUsers::FirstName, 100))
                    .col(string_len(IdentityUsers::LastName, 100))
                    .col(string_len_null(IdentityUsers::PhoneNumber, 32))
                    .col(text_null(IdentityUsers::ProfilePicture))
                    .col(
                        ColumnDef::new(IdentityUsers::Roles)
                            .array(ColumnType::Text)
                            .not_null()
                            .default(Expr::cust("ARRAY['user']::TEXT[]")),
                    )
                    .col(boolean(IdentityUsers::IsVerified).default(false))
                    .col(string_null(IdentityUsers::VerificationToken))
                    .col(string_null(IdentityUsers::PasswordResetToken))
                    .col(timestamp_with_time_zone_null(
                        IdentityUsers::PasswordResetExpires,
                    ))
                    .col(boolean(IdentityUsers::IsActive).default(true))
                    .col(
                        timestamp_with_time_zone(IdentityUsers::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(IdentityUsers::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // A reset token never exists without its expiry, or the reverse
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                ALTER TABLE identity_users
                    ADD CONSTRAINT identity_users_reset_pair CHECK (
                        (password_reset_token IS NULL) = (password_reset_expires IS NULL)
                    )
                "#,
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_identity_users_verification_token")
                    .table(IdentityUsers::Table)
                    .col(IdentityUsers::VerificationToken)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_identity_users_password_reset_token")
                    .table(IdentityUsers::Table)
                    .col(IdentityUsers::PasswordResetToken)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_identity_users_created_at")
                    .table(IdentityUsers::Table)
                    .col(IdentityUsers::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IdentityUsers::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum IdentityUsers {
    Table,
    Id,
    Email,
    PasswordHash,
    FirstName,
    LastName,
    PhoneNumber,
    ProfilePicture,
    Roles,
    IsVerified,
    VerificationToken,
    PasswordResetToken,
    PasswordResetExpires,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
